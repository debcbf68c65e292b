//! Custom error types and handling
//!
//! This module defines the application's error taxonomy: user-input errors
//! reported back on the session stream, per-testcase errors the pipeline
//! recovers from, and terminal errors that end a judging run.

use crate::models::StatusCode;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // User-input errors
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("invalid testcase index: {0}")]
    InvalidTestcaseIndex(i64),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("no session is initialized")]
    NoSession,

    #[error("no judge is running")]
    NoActiveJudge,

    // Per-testcase errors (recovered inside the pipeline loop)
    #[error("time limit exceeded")]
    TimeLimitExceeded,

    #[error("memory limit exceeded")]
    MemoryLimitExceeded,

    #[error("runtime error: {0}")]
    Runtime(String),

    // Terminal pipeline errors
    #[error("judging aborted")]
    Aborted,

    #[error("compile error: {0}")]
    Compile(String),

    #[error("custom judger error: {0}")]
    Judger(String),

    #[error("system error: {0}")]
    System(String),

    #[error("unknown error: {0}")]
    Unknown(String),

    // Internal errors
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code reported on the wire for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidField(_) => "invalid_field",
            Self::InvalidTestcaseIndex(_) => "invalid_testcase_count",
            Self::CommandNotFound(_) => "command_not_found",
            Self::NoSession => "no_session",
            Self::NoActiveJudge => "no_active_judge",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::Runtime(_) => "runtime_error",
            Self::Aborted => "aborted",
            Self::Compile(_) => "compile_error",
            Self::Judger(_) => "judger_error",
            Self::System(_) => "system_error",
            Self::Unknown(_) => "unknown_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Map this error to the verdict it classifies as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TimeLimitExceeded => StatusCode::TimeLimitExceeded,
            Self::MemoryLimitExceeded => StatusCode::MemoryLimitExceeded,
            Self::Runtime(_) => StatusCode::RuntimeError,
            Self::Compile(_) => StatusCode::CompileError,
            Self::Judger(_) | Self::System(_) => StatusCode::SystemError,
            _ => StatusCode::UnknownError,
        }
    }

    /// Whether the pipeline loop recovers from this error as a per-testcase
    /// verdict instead of ending the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TimeLimitExceeded | Self::MemoryLimitExceeded | Self::Runtime(_)
        )
    }
}

impl From<bollard::errors::Error> for AppError {
    fn from(err: bollard::errors::Error) -> Self {
        AppError::System(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::System(err.to_string())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

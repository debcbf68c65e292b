//! Verdict model
//!
//! Status codes are stable integers on the wire; higher ordinal means a
//! worse verdict, and the overall verdict of a run is the maximum over all
//! per-testcase verdicts.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Verdict of one testcase run (or of the whole judging)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StatusCode {
    Accepted = 0,
    WrongAnswer = 1,
    TimeLimitExceeded = 2,
    MemoryLimitExceeded = 3,
    RuntimeError = 4,
    CompileError = 5,
    SystemError = 6,
    UnknownError = 7,
}

impl StatusCode {
    /// Parse a status code from its stable integer value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Accepted),
            1 => Some(Self::WrongAnswer),
            2 => Some(Self::TimeLimitExceeded),
            3 => Some(Self::MemoryLimitExceeded),
            4 => Some(Self::RuntimeError),
            5 => Some(Self::CompileError),
            6 => Some(Self::SystemError),
            7 => Some(Self::UnknownError),
            _ => None,
        }
    }

    /// Get the verdict as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::CompileError => "compile_error",
            Self::SystemError => "system_error",
            Self::UnknownError => "unknown_error",
        }
    }

    /// Check if this verdict means the testcase passed
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code).ok_or_else(|| D::Error::custom(format!("unknown status code {code}")))
    }
}

/// Event yielded by the judging pipeline.
///
/// Kept as a sum type internally; flattened to the wire record at send time.
#[derive(Debug, Clone)]
pub enum JudgeEvent {
    /// Compile succeeded but produced output
    Compiler { message: String },
    /// Verdict of one testcase
    Testcase {
        index: u32,
        status: StatusCode,
        time: Option<f64>,
        /// Average and peak resident memory in MiB
        memory: Option<(f64, f64)>,
        point: Option<f64>,
        feedback: Option<String>,
    },
    /// Aggregated verdict over the whole run
    Overall { status: StatusCode },
}

/// Flattened per-testcase result record sent to the client.
///
/// Compiler and overall events go out as bare `judge.compiler` /
/// `judge.overall` frames; only testcase events carry this record, so
/// `position` is the testcase index. `memory` is `(average, peak)` resident
/// size in MiB (kilobytes as reported by `time(1)`, divided by 1024).
#[derive(Debug, Clone, Serialize)]
pub struct JudgeResult {
    pub position: u32,
    pub status: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JudgeResult {
    /// Flatten a testcase event into the wire record
    pub fn from_testcase(
        index: u32,
        status: StatusCode,
        time: Option<f64>,
        memory: Option<(f64, f64)>,
        point: Option<f64>,
        feedback: Option<String>,
    ) -> Self {
        Self {
            position: index,
            status,
            time,
            memory,
            point,
            feedback,
            error: None,
        }
    }
}

/// Connection-level state of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Busy,
    Disconnect,
}

/// Status record reported by `command.status` and `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub status: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(StatusCode::Accepted < StatusCode::WrongAnswer);
        assert!(StatusCode::WrongAnswer < StatusCode::TimeLimitExceeded);
        assert!(StatusCode::RuntimeError < StatusCode::CompileError);
        assert!(StatusCode::SystemError < StatusCode::UnknownError);
    }

    #[test]
    fn test_status_roundtrip() {
        for code in 0..8 {
            let status = StatusCode::from_code(code).unwrap();
            assert_eq!(status as u8, code);
        }
        assert!(StatusCode::from_code(8).is_none());
    }

    #[test]
    fn test_status_serializes_as_integer() {
        let json = serde_json::to_string(&StatusCode::MemoryLimitExceeded).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn test_result_skips_empty_fields() {
        let result = JudgeResult::from_testcase(0, StatusCode::Accepted, Some(0.5), None, None, None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["position"], 0);
        assert_eq!(json["status"], 0);
        assert!(json.get("memory").is_none());
        assert!(json.get("feedback").is_none());
    }
}

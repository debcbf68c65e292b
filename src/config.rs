//! Application configuration management
//!
//! This module handles loading and validating configuration from environment
//! variables. All configuration is loaded at startup and validated before the
//! application runs.

use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CATALOGUE_PATH, DEFAULT_COMPILER_MEM_LIMIT, DEFAULT_EVALUATION_PATH,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_JUDGYSE_DIR, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
    DEFAULT_TIME_PATH, DEFAULT_TIMEOUT_PATH,
};

/// Global application configuration (lazily initialized)
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::from_env().expect("Failed to load configuration from environment")
});

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Sandbox back-end configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Run submissions in Docker containers instead of subprocesses
    pub run_in_docker: bool,
    /// This process itself runs inside a container
    pub inside_docker: bool,
    /// Enforce memory via `ulimit -v` and time via a `timeout(1)` wrapper
    pub hard_limit: bool,
    /// Memory cap applied to the compile step
    pub compiler_mem_limit: String,
    pub time_path: PathBuf,
    pub timeout_path: PathBuf,
}

/// Session handling configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval of the connection-liveness check
    pub heartbeat_interval: Duration,
    /// Wipe `execution/` and `testcases/` at startup
    pub wipe_on_start: bool,
}

/// Evaluation-tree and catalogue storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root of the evaluation tree (`execution/`, `testcases/` live below it)
    pub evaluation_path: PathBuf,
    /// Host mount point of the evaluation tree when running inside Docker
    pub judgyse_dir: PathBuf,
    /// Directory holding `languages.json` and `compilers.json`
    pub catalogue_path: PathBuf,
    /// Pretty-print JSON written to disk
    pub pretty_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig::from_env()?,
            sandbox: SandboxConfig::from_env()?,
            session: SessionConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1")
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| DEFAULT_SERVER_PORT.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            log_level: env::var("LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        })
    }
}

impl SandboxConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let inside_docker = env_flag("INSIDE_DOCKER");

        Ok(Self {
            // Running inside a container implies the container back-end
            run_in_docker: inside_docker || env_flag("RUN_IN_DOCKER"),
            inside_docker,
            hard_limit: env_flag("HARD_LIMIT"),
            compiler_mem_limit: env::var("COMPILER_MEM_LIMIT")
                .unwrap_or_else(|_| DEFAULT_COMPILER_MEM_LIMIT.to_string()),
            time_path: PathBuf::from(
                env::var("TIME_PATH").unwrap_or_else(|_| DEFAULT_TIME_PATH.to_string()),
            ),
            timeout_path: PathBuf::from(
                env::var("TIMEOUT_PATH").unwrap_or_else(|_| DEFAULT_TIMEOUT_PATH.to_string()),
            ),
        })
    }
}

impl SessionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            heartbeat_interval: Duration::from_secs(
                env::var("HEARTBEAT_INTERVAL")
                    .unwrap_or_else(|_| DEFAULT_HEARTBEAT_INTERVAL_SECS.to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("HEARTBEAT_INTERVAL".to_string()))?,
            ),
            wipe_on_start: env_flag("WIPE"),
        })
    }
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            evaluation_path: PathBuf::from(
                env::var("EVALUATION_PATH").unwrap_or_else(|_| DEFAULT_EVALUATION_PATH.to_string()),
            ),
            judgyse_dir: PathBuf::from(
                env::var("JUDGYSE_DIR").unwrap_or_else(|_| DEFAULT_JUDGYSE_DIR.to_string()),
            ),
            catalogue_path: PathBuf::from(
                env::var("CATALOGUE_PATH").unwrap_or_else(|_| DEFAULT_CATALOGUE_PATH.to_string()),
            ),
            pretty_json: env::var("ENV").unwrap_or_else(|_| "development".to_string())
                == "development",
        })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

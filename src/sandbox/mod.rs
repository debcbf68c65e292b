//! Sandbox drivers
//!
//! A sandbox runs one command in an isolated environment with a memory cap,
//! no network, and a wall-clock timeout. Two back-ends implement the same
//! capability: a subprocess back-end for bare-metal deployments and a Docker
//! back-end driven through bollard. The back-end is selected once at process
//! start from the environment.

pub mod container;
pub mod local;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;

use crate::config::SandboxConfig;
use crate::error::AppResult;

pub use container::ContainerSandbox;
pub use local::LocalSandbox;

/// A host path bound into the sandbox
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }
}

/// One command to run in isolation
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Fully rendered shell command
    pub command: String,
    /// Container image (ignored by the local back-end)
    pub image: String,
    /// Working directory on the host (local back-end)
    pub workdir: PathBuf,
    /// Working directory inside the container
    pub container_workdir: String,
    /// Memory cap as a size string like "256m"
    pub mem_limit: Option<String>,
    /// Wall-clock timeout for the whole run
    pub wall_timeout: Option<Duration>,
    /// Bind mounts (container back-end)
    pub mounts: Vec<Mount>,
    /// Data piped to the command's stdin
    pub stdin: Option<String>,
}

/// What came back from an isolated run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Combined stdout and stderr
    pub output: String,
    /// Exit code of the sandboxed command
    pub exit_code: i64,
    /// The kernel killed the run for exceeding its memory cap
    pub oom_killed: bool,
    /// Wall time of the run in seconds
    pub wall_time: f64,
}

/// Isolated command execution, selected once per process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a command to completion under the spec's limits.
    ///
    /// A wall-clock timeout maps to `AppError::TimeLimitExceeded`; provider
    /// faults map to `AppError::System`.
    async fn run(&self, spec: RunSpec) -> AppResult<RunOutcome>;

    /// Tear down whatever `run` currently has in flight
    async fn stop(&self);
}

/// Build the sandbox back-end the configuration asks for
pub fn build(config: &SandboxConfig, docker: Option<Docker>) -> AppResult<Arc<dyn Sandbox>> {
    if config.run_in_docker {
        let docker = docker.ok_or_else(|| {
            crate::error::AppError::System("container back-end requires a Docker client".to_string())
        })?;
        Ok(Arc::new(ContainerSandbox::new(docker)))
    } else {
        Ok(Arc::new(LocalSandbox::new()))
    }
}

//! Local subprocess sandbox
//!
//! Runs the rendered command through `/bin/sh -c` in the execution
//! directory. Isolation is best-effort: memory is capped by a `ulimit -v`
//! prefix and time by a `timeout(1)` wrapper, both added by the pipeline
//! when hard-limit mode is on. The wall-clock timeout here is the backstop.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AppError, AppResult};

use super::{RunOutcome, RunSpec, Sandbox};

/// Subprocess back-end
pub struct LocalSandbox;

impl LocalSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn run(&self, spec: RunSpec) -> AppResult<RunOutcome> {
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.workdir)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future must not leave the child running
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| AppError::System(format!("failed to spawn sandbox command: {e}")))?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                drop(stdin);
            }
        }

        let wait = child.wait_with_output();
        let output = match spec.wall_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| AppError::TimeLimitExceeded)?,
            None => wait.await,
        }
        .map_err(|e| AppError::System(format!("failed to collect sandbox output: {e}")))?;

        let wall_time = start.elapsed().as_secs_f64();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(RunOutcome {
            output: combined,
            exit_code: output.status.code().unwrap_or(-1) as i64,
            oom_killed: false,
            wall_time,
        })
    }

    async fn stop(&self) {
        // Nothing to do: the in-flight wait future owns the child and kills
        // it on drop.
    }
}

//! Docker container sandbox
//!
//! Each run starts a fresh detached container from the compiler's image with
//! the memory cap applied, networking disabled, and the evaluation tree bind
//! mounted. After the wait completes the container is inspected for the OOM
//! flag, exit code, and timestamps, its combined log is collected, and the
//! container is removed before the next run.

use bollard::{
    Docker,
    container::LogOutput,
    models::{ContainerCreateBody, HostConfig},
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, StartContainerOptions, WaitContainerOptions,
    },
};
use futures::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::meter::mem_convert;

use super::{Mount, RunOutcome, RunSpec, Sandbox};

/// Docker back-end driven through bollard
pub struct ContainerSandbox {
    docker: Docker,
    /// Container currently in flight, so an abort can tear it down
    current: Mutex<Option<String>>,
}

impl ContainerSandbox {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            current: Mutex::new(None),
        }
    }

    async fn remove(&self, id: &str) {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            tracing::warn!(container = id, "Failed to remove container: {e}");
        }
    }

    async fn collect_logs(&self, id: &str) -> AppResult<String> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .build();

        let mut logs = self.docker.logs(id, Some(options));
        let mut combined = String::new();
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    combined.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(combined)
    }
}

#[async_trait::async_trait]
impl Sandbox for ContainerSandbox {
    async fn run(&self, spec: RunSpec) -> AppResult<RunOutcome> {
        let memory = spec
            .mem_limit
            .as_deref()
            .map(mem_convert)
            .transpose()?
            .map(|bytes| bytes as i64);

        let host_config = HostConfig {
            memory,
            memory_swap: memory,
            binds: Some(spec.mounts.iter().map(bind_string).collect()),
            ..Default::default()
        };

        let name = format!("judgyse-{}", Uuid::new_v4());
        let options = CreateContainerOptionsBuilder::default().name(&name).build();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                spec.command.clone(),
            ]),
            working_dir: Some(spec.container_workdir.clone()),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = self.docker.create_container(Some(options), body).await?;
        let id = container.id;
        *self.current.lock().await = Some(id.clone());

        self.docker
            .start_container(&id, None::<StartContainerOptions>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(&id, None::<WaitContainerOptions>);
        let waited = match spec.wall_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait.next()).await {
                Ok(item) => item,
                Err(_) => {
                    self.current.lock().await.take();
                    self.remove(&id).await;
                    return Err(AppError::TimeLimitExceeded);
                }
            },
            None => wait.next().await,
        };

        match waited {
            // A non-zero exit surfaces as a wait "error"; the exit code is
            // read from inspect below either way.
            Some(Ok(_)) | Some(Err(bollard::errors::Error::DockerContainerWaitError { .. })) => {}
            Some(Err(e)) => {
                self.current.lock().await.take();
                self.remove(&id).await;
                return Err(e.into());
            }
            None => {
                self.current.lock().await.take();
                self.remove(&id).await;
                return Err(AppError::System("container wait stream ended early".to_string()));
            }
        }

        let inspect = self
            .docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await?;
        let state = inspect.state.unwrap_or_default();

        let oom_killed = state.oom_killed.unwrap_or(false);
        let exit_code = state.exit_code.unwrap_or(-1);
        let wall_time =
            wall_time_between(state.started_at.as_deref(), state.finished_at.as_deref())
                .unwrap_or(0.0);

        let output = self.collect_logs(&id).await?;

        self.current.lock().await.take();
        self.remove(&id).await;

        Ok(RunOutcome {
            output,
            exit_code,
            oom_killed,
            wall_time,
        })
    }

    async fn stop(&self) {
        if let Some(id) = self.current.lock().await.take() {
            tracing::info!(container = %id, "Stopping in-flight container");
            self.remove(&id).await;
        }
    }
}

fn bind_string(mount: &Mount) -> String {
    if mount.read_only {
        format!("{}:{}:ro", mount.host.display(), mount.container)
    } else {
        format!("{}:{}", mount.host.display(), mount.container)
    }
}

/// Wall time between two RFC3339 timestamps from container inspect
fn wall_time_between(started: Option<&str>, finished: Option<&str>) -> Option<f64> {
    let started = chrono::DateTime::parse_from_rfc3339(started?).ok()?;
    let finished = chrono::DateTime::parse_from_rfc3339(finished?).ok()?;
    let millis = (finished - started).num_milliseconds();
    if millis < 0 {
        return None;
    }
    Some(millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_bind_string() {
        let mount = Mount::new(PathBuf::from("/data/execution"), "/execution");
        assert_eq!(bind_string(&mount), "/data/execution:/execution");

        let mount = Mount::read_only(PathBuf::from("/data/in.txt"), "/execution/in.txt");
        assert_eq!(bind_string(&mount), "/data/in.txt:/execution/in.txt:ro");
    }

    #[test]
    fn test_wall_time_between() {
        let wall = wall_time_between(
            Some("2024-05-01T10:00:00.000000000Z"),
            Some("2024-05-01T10:00:01.250000000Z"),
        );
        assert_eq!(wall, Some(1.25));
    }

    #[test]
    fn test_wall_time_rejects_bad_input() {
        assert_eq!(wall_time_between(None, Some("2024-05-01T10:00:00Z")), None);
        assert_eq!(wall_time_between(Some("not a date"), Some("also not")), None);
        // Docker reports zero timestamps for containers that never started
        assert_eq!(
            wall_time_between(Some("2024-05-01T10:00:00Z"), Some("0001-01-01T00:00:00Z")),
            None
        );
    }
}

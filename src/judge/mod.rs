//! Judging pipeline
//!
//! The orchestrator behind `command.judge`: compile once, run every testcase
//! in the configured range through the sandbox, classify each run into a
//! verdict, and aggregate the overall verdict. Events stream out through a
//! bounded channel while the run is in progress; the session layer forwards
//! them to the client.
//!
//! Verdict classification per testcase:
//!
//! | condition                        | verdict                 |
//! |----------------------------------|-------------------------|
//! | sandbox wall timeout             | `TIME_LIMIT_EXCEEDED`   |
//! | OOM kill or peak above the cap   | `MEMORY_LIMIT_EXCEEDED` |
//! | non-zero exit                    | `RUNTIME_ERROR`         |
//! | output mismatch                  | `WRONG_ANSWER`          |
//! | otherwise                        | `ACCEPTED`              |
//!
//! Time/memory/runtime errors are recovered per testcase; compile, system,
//! and unknown errors end the run.

pub mod compare;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};

use crate::catalogue::{Catalogue, render};
use crate::config::Config;
use crate::constants::{
    CONTAINER_COMPILE_DIR, CONTAINER_EXECUTION_DIR, CONTAINER_TIME_PATH, EXECUTION_DIR,
    JUDGER_FILE, TESTCASES_DIR,
};
use crate::error::{AppError, AppResult};
use crate::meter::{mem_convert, mem_convert_kib, parse_meter, wrap_with_meter};
use crate::models::{JudgeEvent, JudgeSession, StatusCode, TestType};
use crate::sandbox::{Mount, RunSpec, Sandbox};

use compare::{JudgerMetadata, builtin_compare, judger_payload, parse_judger_output};

/// Cancellation flag shared between the session and a running pipeline.
///
/// The per-testcase loop observes it at the top of each iteration; an
/// in-flight sandbox wait is raced against it so aborts land promptly.
#[derive(Debug, Default)]
pub struct AbortFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is set
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// On-disk layout of the evaluation tree for this process
#[derive(Debug, Clone)]
pub struct JudgeDirs {
    /// Evaluation root as this process sees it
    pub root: PathBuf,
    pub execution: PathBuf,
    pub testcases: PathBuf,
    /// Evaluation root as the Docker daemon sees it; differs from `root`
    /// only when this process itself runs inside a container
    host_root: PathBuf,
}

impl JudgeDirs {
    pub fn new(root: PathBuf, host_root: PathBuf) -> Self {
        Self {
            execution: root.join(EXECUTION_DIR),
            testcases: root.join(TESTCASES_DIR),
            root,
            host_root,
        }
    }

    /// Resolve the layout from configuration and the container-derived
    /// process id (present only when running inside Docker)
    pub fn resolve(config: &Config, process_id: Option<&str>) -> AppResult<Self> {
        let mut root = std::path::absolute(&config.storage.evaluation_path)?;
        let mut host_root = root.clone();

        if config.sandbox.inside_docker {
            let process_id = process_id.ok_or_else(|| {
                AppError::System("running inside Docker but no process id was derived".to_string())
            })?;
            root = root.join(process_id);
            host_root = config.storage.judgyse_dir.join(process_id);
        }

        Ok(Self::new(root, host_root))
    }

    pub fn testcase_dir(&self, index: u32) -> PathBuf {
        self.testcases.join(index.to_string())
    }

    pub fn host_execution(&self) -> PathBuf {
        self.host_root.join(EXECUTION_DIR)
    }

    pub fn host_testcase(&self, index: u32) -> PathBuf {
        self.host_root.join(TESTCASES_DIR).join(index.to_string())
    }

    /// Create the tree
    pub fn prepare(&self) -> AppResult<()> {
        fs::create_dir_all(&self.execution)?;
        fs::create_dir_all(&self.testcases)?;
        Ok(())
    }

    /// Drop all submission artifacts and recreate the empty tree
    pub fn wipe(&self) -> AppResult<()> {
        for dir in [&self.execution, &self.testcases] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        self.prepare()
    }
}

/// Everything one testcase run produced
struct TestcaseVerdict {
    status: StatusCode,
    time: Option<f64>,
    memory: Option<(f64, f64)>,
    point: Option<f64>,
    feedback: Option<String>,
}

/// The judging pipeline
pub struct JudgePipeline {
    config: Config,
    catalogue: Arc<Catalogue>,
    sandbox: Arc<dyn Sandbox>,
    dirs: JudgeDirs,
}

impl JudgePipeline {
    pub fn new(
        config: Config,
        catalogue: Arc<Catalogue>,
        sandbox: Arc<dyn Sandbox>,
        dirs: JudgeDirs,
    ) -> Self {
        Self {
            config,
            catalogue,
            sandbox,
            dirs,
        }
    }

    /// Drive one judging run, streaming events through `events`.
    ///
    /// Emits at most one compiler event, one event per testcase in the
    /// range (ascending), and one terminal overall event. Terminal errors
    /// (`COMPILE_ERROR`, `SYSTEM_ERROR`, `UNKNOWN_ERROR`, `ABORTED`)
    /// propagate out instead.
    pub async fn judge(
        &self,
        session: &JudgeSession,
        abort: &AbortFlag,
        events: &mpsc::Sender<JudgeEvent>,
    ) -> AppResult<()> {
        self.dirs.prepare()?;

        let language = self.catalogue.language(&session.language.0)?;
        let compiler = self.catalogue.compiler(&session.compiler.0)?;

        let code = render(&language.file, &[("id", &session.submission_id)]);
        let executable = render(&language.executable, &[("id", &session.submission_id)]);
        let language_version = session.language.1.clone().unwrap_or_default();

        let image = render(&compiler.image, &[("version", &session.compiler.1)]);
        let compile_command = render(
            &compiler.compile,
            &[
                ("source", code.as_str()),
                ("executable", executable.as_str()),
                ("version", language_version.as_str()),
            ],
        );
        let execute = render(&compiler.execute, &[("executable", executable.as_str())]);

        tracing::info!(
            submission = %session.submission_id,
            language = %session.language.0,
            compiler = %session.compiler.0,
            "Starting judging run"
        );

        let warn = self.compile(&image, &compile_command).await?;
        if !warn.is_empty() {
            send_event(events, JudgeEvent::Compiler { message: warn }).await?;
        }

        let per_test_point = session.point / session.testcase_count() as f64;
        let mut statuses = Vec::with_capacity(session.testcase_count() as usize);

        for index in session.test_range.0..=session.test_range.1 {
            if abort.is_set() {
                return Err(AppError::Aborted);
            }

            let verdict = match self
                .run_testcase(index, session, &image, &execute, per_test_point, abort)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(testcase = index, verdict = %e.status_code(), "Testcase failed");
                    TestcaseVerdict {
                        status: e.status_code(),
                        time: None,
                        memory: None,
                        point: None,
                        feedback: match e {
                            AppError::Runtime(stdout) => Some(stdout),
                            _ => None,
                        },
                    }
                }
                Err(e) => return Err(e),
            };

            statuses.push(verdict.status);
            send_event(
                events,
                JudgeEvent::Testcase {
                    index,
                    status: verdict.status,
                    time: verdict.time,
                    memory: verdict.memory,
                    point: verdict.point,
                    feedback: verdict.feedback,
                },
            )
            .await?;
        }

        // Worst verdict wins; ties go to the first seen
        let overall = statuses
            .iter()
            .copied()
            .max()
            .unwrap_or(StatusCode::Accepted);
        send_event(events, JudgeEvent::Overall { status: overall }).await?;

        tracing::info!(submission = %session.submission_id, overall = %overall, "Judging run finished");
        Ok(())
    }

    /// Compile the submission; returns compiler output on success
    async fn compile(&self, image: &str, compile_command: &str) -> AppResult<String> {
        let sandbox_config = &self.config.sandbox;

        let command = if sandbox_config.hard_limit {
            format!(
                "ulimit -v {} && {}",
                mem_convert_kib(&sandbox_config.compiler_mem_limit)?,
                compile_command
            )
        } else {
            compile_command.to_string()
        };

        let spec = RunSpec {
            command,
            image: image.to_string(),
            workdir: self.dirs.execution.clone(),
            container_workdir: CONTAINER_COMPILE_DIR.to_string(),
            mem_limit: Some(sandbox_config.compiler_mem_limit.clone()),
            wall_timeout: None,
            mounts: vec![Mount::new(self.dirs.host_execution(), CONTAINER_COMPILE_DIR)],
            stdin: None,
        };

        let outcome = self.sandbox.run(spec).await?;
        if outcome.exit_code != 0 {
            return Err(AppError::Compile(outcome.output));
        }
        Ok(outcome.output)
    }

    /// Run one testcase through the sandbox and classify the outcome
    async fn run_testcase(
        &self,
        index: u32,
        session: &JudgeSession,
        image: &str,
        execute: &str,
        per_test_point: f64,
        abort: &AbortFlag,
    ) -> AppResult<TestcaseVerdict> {
        let sandbox_config = &self.config.sandbox;
        let (input_name, output_name) = (&session.test_file.0, &session.test_file.1);

        let expected = fs::read_to_string(self.dirs.testcase_dir(index).join(output_name))
            .map_err(|e| AppError::System(format!("cannot read expected output {index}: {e}")))?;

        let mut command = match session.test_type {
            TestType::File => execute.to_string(),
            TestType::Std => format!("cat {input_name} | {execute}"),
        };

        if sandbox_config.hard_limit {
            command = format!(
                "/bin/bash -c \"ulimit -v {} && {{timeout}} {}\"",
                mem_convert_kib(&session.limit.memory)?,
                command
            );
        }

        // The timeout wrapper only applies locally; the container back-end
        // enforces the wall clock through its own wait
        let timeout_wrapper = if sandbox_config.hard_limit && !sandbox_config.run_in_docker {
            format!(
                "{} {}",
                sandbox_config.timeout_path.display(),
                session.limit.time
            )
        } else {
            String::new()
        };
        command = command.replace("{timeout}", &timeout_wrapper);

        let time_path = if sandbox_config.run_in_docker {
            Path::new(CONTAINER_TIME_PATH)
        } else {
            sandbox_config.time_path.as_path()
        };
        command = wrap_with_meter(&command, time_path, !sandbox_config.run_in_docker);

        let mounts = if sandbox_config.run_in_docker {
            vec![
                Mount::new(self.dirs.host_execution(), CONTAINER_EXECUTION_DIR),
                Mount::read_only(sandbox_config.time_path.clone(), CONTAINER_TIME_PATH),
                Mount::read_only(
                    self.dirs.host_testcase(index).join(input_name),
                    format!("{CONTAINER_EXECUTION_DIR}/{input_name}"),
                ),
            ]
        } else {
            fs::copy(
                self.dirs.testcase_dir(index).join(input_name),
                self.dirs.execution.join(input_name),
            )
            .map_err(|e| AppError::System(format!("cannot stage testcase input {index}: {e}")))?;
            vec![]
        };

        let spec = RunSpec {
            command,
            image: image.to_string(),
            workdir: self.dirs.execution.clone(),
            container_workdir: CONTAINER_EXECUTION_DIR.to_string(),
            mem_limit: Some(session.limit.memory.clone()),
            wall_timeout: Some(Duration::from_secs_f64(session.limit.time)),
            mounts,
            stdin: None,
        };

        let outcome = tokio::select! {
            outcome = self.sandbox.run(spec) => outcome?,
            _ = abort.wait() => {
                self.sandbox.stop().await;
                return Err(AppError::Aborted);
            }
        };

        let reading = parse_meter(&outcome.output);

        let limit_mib = mem_convert(&session.limit.memory)? as f64 / (1024.0 * 1024.0);
        let peak_mib = reading.memory.map(|(_, peak)| peak);
        if outcome.oom_killed || peak_mib.is_some_and(|peak| peak > limit_mib) {
            return Err(AppError::MemoryLimitExceeded);
        }

        let time = if sandbox_config.run_in_docker {
            outcome.wall_time
        } else {
            reading.time.unwrap_or(outcome.wall_time)
        };

        let exit_code = reading.exit_code.unwrap_or(outcome.exit_code);
        // The timeout(1) wrapper reports 124 when it fires before the
        // sandbox's own wall clock does
        if exit_code == 124 && sandbox_config.hard_limit && !sandbox_config.run_in_docker {
            return Err(AppError::TimeLimitExceeded);
        }
        if exit_code != 0 {
            return Err(AppError::Runtime(reading.stdout));
        }

        let output = match session.test_type {
            TestType::File => fs::read_to_string(self.dirs.execution.join(output_name))
                .map_err(|e| AppError::Unknown(format!("cannot read program output: {e}")))?,
            TestType::Std => reading.stdout.clone(),
        };

        match session.judge_mode.mode {
            0 => {
                let accepted = builtin_compare(&output, &expected, &session.judge_mode);
                Ok(TestcaseVerdict {
                    status: if accepted {
                        StatusCode::Accepted
                    } else {
                        StatusCode::WrongAnswer
                    },
                    time: Some(time),
                    memory: reading.memory,
                    point: Some(if accepted { per_test_point } else { 0.0 }),
                    feedback: if accepted { None } else { Some(output) },
                })
            }
            1 => {
                let metadata = JudgerMetadata {
                    index,
                    point: per_test_point,
                    language: session.language.0.clone(),
                    time: Some(time),
                    memory: reading.memory,
                };
                let verdict = self
                    .run_judger(image, session, &output, &expected, &metadata)
                    .await?;
                Ok(TestcaseVerdict {
                    status: verdict.status,
                    time: Some(time),
                    memory: reading.memory,
                    point: Some(verdict.point),
                    feedback: verdict.feedback,
                })
            }
            mode => Err(AppError::System(format!("unknown judge mode: {mode}"))),
        }
    }

    /// Invoke the uploaded custom judger with output/expected/metadata on
    /// stdin. A misbehaving judger is a system fault, never a verdict.
    async fn run_judger(
        &self,
        image: &str,
        session: &JudgeSession,
        output: &str,
        expected: &str,
        metadata: &JudgerMetadata,
    ) -> AppResult<compare::JudgerVerdict> {
        let spec = RunSpec {
            command: format!("python3 {JUDGER_FILE}"),
            image: image.to_string(),
            workdir: self.dirs.execution.clone(),
            container_workdir: CONTAINER_EXECUTION_DIR.to_string(),
            mem_limit: None,
            wall_timeout: Some(Duration::from_secs_f64(session.limit.time)),
            mounts: vec![Mount::new(
                self.dirs.host_execution(),
                CONTAINER_EXECUTION_DIR,
            )],
            stdin: Some(judger_payload(output, expected, metadata)),
        };

        let outcome = self
            .sandbox
            .run(spec)
            .await
            .map_err(|e| AppError::Judger(format!("judger did not finish: {e}")))?;

        if outcome.exit_code != 0 {
            return Err(AppError::Judger(format!(
                "judger exited with {}: {}",
                outcome.exit_code, outcome.output
            )));
        }

        parse_judger_output(&outcome.output, metadata.point)
    }
}

async fn send_event(events: &mpsc::Sender<JudgeEvent>, event: JudgeEvent) -> AppResult<()> {
    // A dropped receiver means the session is gone; stop judging
    events.send(event).await.map_err(|_| AppError::Aborted)
}

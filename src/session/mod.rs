//! Session management
//!
//! One `SessionManager` instance owns all per-connection state: the session
//! record, the evaluation tree, the abort flag, and the outbound half of the
//! socket. The connection-level state machine is
//! `disconnect → idle → busy → idle → disconnect`; at most one client may
//! hold the session at a time.
//!
//! `command.judge` runs the pipeline as a spawned task that emits events
//! through a bounded channel; this module forwards channel → socket, so
//! transport flow control never blocks the judging loop and all sends stay
//! serialised through one writer.

pub mod protocol;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};

use crate::catalogue::{Catalogue, render};
use crate::config::Config;
use crate::constants::{JUDGER_FILE, commands, topics};
use crate::error::{AppError, AppResult};
use crate::judge::{AbortFlag, JudgeDirs, JudgePipeline};
use crate::models::{JudgeEvent, JudgeResult, JudgeSession, SessionState, SessionStatus};
use crate::sandbox::Sandbox;

use protocol::{Ack, ErrorReply, make_bare_frame, make_frame, parse_frame};

/// What the session pushes to the connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A serialized `[topic, payload]` frame
    Frame(String),
    /// Liveness probe
    Ping,
    /// Close the connection
    Close { code: u16, reason: &'static str },
}

/// Per-process session manager; one active client at a time
pub struct SessionManager {
    config: Config,
    catalogue: Arc<Catalogue>,
    sandbox: Arc<dyn Sandbox>,
    dirs: JudgeDirs,
    state: RwLock<SessionState>,
    progress: RwLock<Option<String>>,
    session: RwLock<Option<JudgeSession>>,
    abort: Arc<AbortFlag>,
    judging: AtomicBool,
    stop_recv: AtomicBool,
    outbound: RwLock<Option<mpsc::UnboundedSender<OutboundMessage>>>,
}

impl SessionManager {
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
            state: RwLock::new(SessionState::Disconnect),
            progress: RwLock::new(None),
            session: RwLock::new(None),
            abort: Arc::new(AbortFlag::new()),
            judging: AtomicBool::new(false),
            stop_recv: AtomicBool::new(false),
            outbound: RwLock::new(None),
        }
    }

    /// Current connection-level status
    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            status: *self.state.read().await,
            progress: self.progress.read().await.clone(),
        }
    }

    pub async fn is_disconnected(&self) -> bool {
        *self.state.read().await == SessionState::Disconnect
    }

    /// Adopt a fresh connection
    pub async fn connect(&self, outbound: mpsc::UnboundedSender<OutboundMessage>) {
        *self.outbound.write().await = Some(outbound);
        *self.state.write().await = SessionState::Idle;
        self.stop_recv.store(false, Ordering::SeqCst);
        tracing::info!("Client connected");
    }

    /// Tear the session down: kill any running judge, drop the connection
    pub async fn disconnect(&self) {
        self.stop_recv.store(true, Ordering::SeqCst);
        self.abort.set();
        self.sandbox.stop().await;

        *self.session.write().await = None;
        *self.progress.write().await = None;
        *self.state.write().await = SessionState::Disconnect;
        *self.outbound.write().await = None;
        tracing::info!("Client disconnected");
    }

    /// Ask the recv loop to wind down (process shutdown)
    pub fn stop_recv(&self) {
        self.stop_recv.store(true, Ordering::SeqCst);
    }

    pub fn should_stop_recv(&self) -> bool {
        self.stop_recv.load(Ordering::SeqCst)
    }

    async fn send(&self, message: OutboundMessage) {
        if let Some(tx) = self.outbound.read().await.as_ref() {
            if tx.send(message).is_err() {
                tracing::debug!("Outbound channel closed, dropping frame");
            }
        }
    }

    async fn send_frame<T: serde::Serialize>(&self, topic: &str, payload: &T) {
        self.send(OutboundMessage::Frame(make_frame(topic, payload)))
            .await;
    }

    async fn send_bare(&self, topic: &str) {
        self.send(OutboundMessage::Frame(make_bare_frame(topic))).await;
    }

    async fn reply(&self, topic: &str, result: AppResult<Ack>) {
        match result {
            Ok(ack) => self.send_frame(topic, &ack).await,
            Err(e) => self.send_frame(topic, &ErrorReply::from_error(&e)).await,
        }
    }

    /// Dispatch one inbound frame; `Break` ends the recv loop
    pub async fn handle(self: &Arc<Self>, text: &str) -> ControlFlow<()> {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {e}");
                return ControlFlow::Continue(());
            }
        };

        tracing::debug!(command = %frame.command, "Handling command");

        match frame.command.as_str() {
            commands::START => self.cmd_start().await,
            commands::INIT => self.cmd_init(&frame.data).await,
            commands::CODE => {
                let result = self.cmd_code(&frame.data).await;
                self.reply(topics::WRITE_CODE, result).await;
            }
            commands::JUDGER => {
                let result = self.cmd_judger(&frame.data).await;
                self.reply(topics::WRITE_JUDGER, result).await;
            }
            commands::TESTCASE => {
                let result = self.cmd_testcase(&frame.data).await;
                self.reply(topics::WRITE_TESTCASE, result).await;
            }
            commands::JUDGE => self.cmd_judge().await,
            commands::STATUS => {
                let status = self.status().await;
                self.send_frame(topics::STATUS, &status).await;
            }
            commands::ABORT => self.cmd_abort().await,
            commands::DECLARE_ENV => self.declare_env(&frame.data),
            commands::DECLARE_LANGUAGE => {
                if let Err(e) = self.catalogue.replace_languages(&frame.data) {
                    tracing::warn!("declare.language rejected: {e}");
                }
            }
            commands::DECLARE_COMPILER => {
                if let Err(e) = self.catalogue.replace_compilers(&frame.data) {
                    tracing::warn!("declare.compiler rejected: {e}");
                }
            }
            commands::DECLARE_LOAD => {
                if let Err(e) = self.catalogue.reload() {
                    tracing::error!("Catalogue reload failed: {e}");
                }
            }
            commands::CLOSE => {
                self.send(OutboundMessage::Close {
                    code: crate::constants::WS_CLOSE_NORMAL,
                    reason: "",
                })
                .await;
                return ControlFlow::Break(());
            }
            other => {
                let error = AppError::CommandNotFound(other.to_string());
                tracing::warn!("{error}");
                self.send_frame(topics::UNKNOWN, &other.to_string()).await;
            }
        }

        ControlFlow::Continue(())
    }

    /// `command.start`: claim the session and reset the evaluation tree
    async fn cmd_start(&self) {
        *self.state.write().await = SessionState::Busy;
        *self.session.write().await = None;
        *self.progress.write().await = None;
        self.abort.clear();

        if let Err(e) = self.dirs.wipe() {
            tracing::error!("Failed to wipe evaluation tree: {e}");
            self.send_frame(topics::JUDGE_ERROR_SYSTEM, &e.to_string())
                .await;
        }
    }

    /// `command.init`: parse and validate the session record
    async fn cmd_init(&self, data: &Value) {
        match JudgeSession::from_value(data) {
            Ok(session) => {
                tracing::info!(submission = %session.submission_id, "Session initialized");
                *self.session.write().await = Some(session);
                self.send_frame(topics::JUDGE_INIT, &Ack::ok()).await;
            }
            Err(e) => {
                tracing::warn!("Session rejected: {e}");
                self.send_frame(topics::JUDGE_INIT, &ErrorReply::from_error(&e))
                    .await;
            }
        }
    }

    /// `command.code`: write the submission source into the execution dir
    async fn cmd_code(&self, data: &Value) -> AppResult<Ack> {
        let session = self.session.read().await.clone().ok_or(AppError::NoSession)?;
        let content = payload_text(data).ok_or_else(|| AppError::InvalidField("code".to_string()))?;

        let language = self.catalogue.language(&session.language.0)?;
        let file_name = render(&language.file, &[("id", &session.submission_id)]);

        std::fs::write(self.dirs.execution.join(&file_name), content)?;
        tracing::debug!(file = %file_name, "Source written");
        Ok(Ack::ok())
    }

    /// `command.judger`: write the custom judger script
    async fn cmd_judger(&self, data: &Value) -> AppResult<Ack> {
        self.session.read().await.clone().ok_or(AppError::NoSession)?;
        let content =
            payload_text(data).ok_or_else(|| AppError::InvalidField("judger".to_string()))?;

        std::fs::write(self.dirs.execution.join(JUDGER_FILE), content)?;
        Ok(Ack::ok())
    }

    /// `command.testcase`: payload `(index, input, output)`
    async fn cmd_testcase(&self, data: &Value) -> AppResult<Ack> {
        let session = self.session.read().await.clone().ok_or(AppError::NoSession)?;

        let parts = data
            .as_array()
            .filter(|array| array.len() >= 3)
            .ok_or_else(|| AppError::InvalidField("testcase".to_string()))?;
        let index = parts[0]
            .as_i64()
            .ok_or_else(|| AppError::InvalidField("testcase index".to_string()))?;
        let input = parts[1]
            .as_str()
            .ok_or_else(|| AppError::InvalidField("testcase input".to_string()))?;
        let output = parts[2]
            .as_str()
            .ok_or_else(|| AppError::InvalidField("testcase output".to_string()))?;

        // Range check comes before any write hits the disk
        if !session.contains(index) {
            return Err(AppError::InvalidTestcaseIndex(index));
        }

        let dir = self.dirs.testcase_dir(index as u32);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(&session.test_file.0), input)?;
        std::fs::write(dir.join(&session.test_file.1), output)?;

        tracing::debug!(testcase = index, "Testcase written");
        Ok(Ack::ok_index(index))
    }

    /// `command.judge`: run the pipeline, stream events, finish with
    /// `judge.done`, and return to idle
    async fn cmd_judge(self: &Arc<Self>) {
        let Some(session) = self.session.read().await.clone() else {
            self.send_frame(
                topics::JUDGE_ERROR_SYSTEM,
                &ErrorReply::from_error(&AppError::NoSession),
            )
            .await;
            self.send_bare(topics::JUDGE_DONE).await;
            return;
        };

        if self.judging.swap(true, Ordering::SeqCst) {
            tracing::warn!("Judge already in progress, ignoring command.judge");
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let (events_tx, mut events_rx) = mpsc::channel::<JudgeEvent>(32);

            let pipeline = JudgePipeline::new(
                manager.config.clone(),
                Arc::clone(&manager.catalogue),
                Arc::clone(&manager.sandbox),
                manager.dirs.clone(),
            );
            let abort = Arc::clone(&manager.abort);
            let run_session = session.clone();
            let run = tokio::spawn(async move {
                pipeline.judge(&run_session, &abort, &events_tx).await
            });

            while let Some(event) = events_rx.recv().await {
                manager.forward_event(event).await;
            }

            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(AppError::Unknown(format!("judge task panicked: {e}"))),
            };
            if let Err(e) = result {
                manager.send_pipeline_error(&e).await;
            }

            manager.send_bare(topics::JUDGE_DONE).await;

            // Back to idle with a clean abort flag, connection stays open
            manager.judging.store(false, Ordering::SeqCst);
            manager.abort.clear();
            *manager.progress.write().await = None;
            let mut state = manager.state.write().await;
            if *state == SessionState::Busy {
                *state = SessionState::Idle;
            }
        });
    }

    async fn forward_event(&self, event: JudgeEvent) {
        match event {
            JudgeEvent::Compiler { message } => {
                self.send_frame(topics::JUDGE_COMPILER, &message).await;
            }
            JudgeEvent::Testcase {
                index,
                status,
                time,
                memory,
                point,
                feedback,
            } => {
                *self.progress.write().await = Some(index.to_string());
                let result = JudgeResult {
                    position: index,
                    status,
                    time,
                    memory,
                    point,
                    feedback,
                    error: None,
                };
                self.send_frame(topics::JUDGE_RESULT, &result).await;
            }
            JudgeEvent::Overall { status } => {
                self.send_frame(topics::JUDGE_OVERALL, &status).await;
            }
        }
    }

    async fn send_pipeline_error(&self, error: &AppError) {
        match error {
            AppError::Aborted => self.send_bare(topics::JUDGE_ABORTED).await,
            AppError::Compile(message) => {
                self.send_frame(topics::JUDGE_ERROR_COMPILER, message).await;
            }
            other => {
                self.send_frame(topics::JUDGE_ERROR_SYSTEM, &other.to_string())
                    .await;
            }
        }
    }

    /// `command.abort` (optional on the wire): cancel the running judge
    async fn cmd_abort(&self) {
        if self.judging.load(Ordering::SeqCst) {
            tracing::info!("Abort requested");
            self.abort.set();
            self.sandbox.stop().await;
            self.send_frame(topics::ABORT, &Ack::ok()).await;
        } else {
            self.send_frame(
                topics::ABORT,
                &ErrorReply::from_error(&AppError::NoActiveJudge),
            )
            .await;
        }
    }

    /// `declare.env`: merge a map into the process environment.
    ///
    /// Single-session by contract; callers must not race a running judge.
    fn declare_env(&self, data: &Value) {
        let Some(map) = data.as_object() else {
            tracing::warn!("declare.env payload is not an object");
            return;
        };
        for (key, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            unsafe { std::env::set_var(key, &value) };
            tracing::debug!(key = %key, "Environment updated");
        }
    }
}

fn payload_text(data: &Value) -> Option<String> {
    match data {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SandboxConfig, ServerConfig, SessionConfig, StorageConfig};
    use crate::constants::{COMPILERS_FILE, LANGUAGES_FILE};
    use crate::sandbox::{MockSandbox, RunOutcome};
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                log_level: "info".to_string(),
            },
            sandbox: SandboxConfig {
                run_in_docker: false,
                inside_docker: false,
                hard_limit: false,
                compiler_mem_limit: "1024m".to_string(),
                time_path: PathBuf::from("/usr/bin/time"),
                timeout_path: PathBuf::from("/usr/bin/timeout"),
            },
            session: SessionConfig {
                heartbeat_interval: Duration::from_secs(3),
                wipe_on_start: false,
            },
            storage: StorageConfig {
                evaluation_path: PathBuf::from("evaluation"),
                judgyse_dir: PathBuf::from("/judgyse"),
                catalogue_path: PathBuf::from("data"),
                pretty_json: false,
            },
        }
    }

    fn manager_with(sandbox: MockSandbox, root: &TempDir) -> Arc<SessionManager> {
        std::fs::write(
            root.path().join(LANGUAGES_FILE),
            json!({"cpp": {"file": "{id}.cpp", "executable": "{id}"}}).to_string(),
        )
        .unwrap();
        std::fs::write(
            root.path().join(COMPILERS_FILE),
            json!({"gcc": {
                "image": "gcc:{version}",
                "compile": "g++ {source} -o {executable}",
                "execute": "./{executable}"
            }})
            .to_string(),
        )
        .unwrap();

        let catalogue = Arc::new(Catalogue::load(root.path(), false).unwrap());
        let dirs = JudgeDirs::new(root.path().join("judge"), root.path().join("judge"));
        Arc::new(SessionManager::new(
            test_config(),
            catalogue,
            Arc::new(sandbox),
            dirs,
        ))
    }

    async fn connect(manager: &Arc<SessionManager>) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.connect(tx).await;
        rx
    }

    fn frame_json(message: OutboundMessage) -> Value {
        match message {
            OutboundMessage::Frame(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        frame_json(message)
    }

    fn init_payload() -> String {
        json!([
            "command.init",
            {
                "submission_id": "s1",
                "language": ["cpp", null],
                "compiler": ["gcc", "latest"],
                "test_range": [1, 3],
                "test_file": ["in.txt", "out.txt"],
                "test_type": "std",
                "judge_mode": {"mode": 0, "trim_endl": true, "case": false},
                "limit": {"time": 1.0, "memory": "256m"},
                "point": 3.0
            }
        ])
        .to_string()
    }

    #[tokio::test]
    async fn test_start_then_init_acks() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        assert_eq!(manager.status().await.status, SessionState::Busy);

        manager.handle(&init_payload()).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.init");
        assert_eq!(frame[1]["status"], 0);
    }

    #[tokio::test]
    async fn test_init_reports_missing_field() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager
            .handle(r#"["command.init", {"submission_id": "s1"}]"#)
            .await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.init");
        assert_eq!(frame[1]["status"], 1);
        assert_eq!(frame[1]["code"], "missing_field");
    }

    #[tokio::test]
    async fn test_code_written_under_rendered_name() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;
        next_frame(&mut rx).await;

        manager
            .handle(r#"["command.code", "int main() { return 0; }"]"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.write:code");
        assert_eq!(frame[1]["status"], 0);

        let written = root.path().join("judge/execution/s1.cpp");
        assert_eq!(
            std::fs::read_to_string(written).unwrap(),
            "int main() { return 0; }"
        );
    }

    #[tokio::test]
    async fn test_testcase_out_of_range_rejected_before_write() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;
        next_frame(&mut rx).await;

        manager
            .handle(r#"["command.testcase", [99, "in", "out"]]"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.write:testcase");
        assert_eq!(frame[1]["status"], 1);
        assert_eq!(frame[1]["code"], "invalid_testcase_count");
        assert_eq!(frame[1]["error"], "invalid testcase index: 99");

        assert!(!root.path().join("judge/testcases/99").exists());
    }

    #[tokio::test]
    async fn test_testcase_written_and_acked_with_index() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;
        next_frame(&mut rx).await;

        manager
            .handle(r#"["command.testcase", [2, "some input", "some output"]]"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[1]["status"], 0);
        assert_eq!(frame[1]["index"], 2);

        let dir = root.path().join("judge/testcases/2");
        assert_eq!(std::fs::read_to_string(dir.join("in.txt")).unwrap(), "some input");
        assert_eq!(
            std::fs::read_to_string(dir.join("out.txt")).unwrap(),
            "some output"
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.frobnicate", null]"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "unknown");
        assert_eq!(frame[1], "command.frobnicate");
    }

    #[tokio::test]
    async fn test_close_breaks_recv_loop() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        let flow = manager.handle(r#"["close", null]"#).await;
        assert!(flow.is_break());
        assert_eq!(
            next_frame_raw(&mut rx).await,
            OutboundMessage::Close {
                code: 1000,
                reason: ""
            }
        );
    }

    async fn next_frame_raw(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_abort_without_judge_is_error() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.abort", null]"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "abort");
        assert_eq!(frame[1]["code"], "no_active_judge");
    }

    #[tokio::test]
    async fn test_full_judge_flow_streams_and_returns_to_idle() {
        let root = TempDir::new().unwrap();

        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_run()
            .withf(|spec| spec.command.contains("g++"))
            .times(1)
            .returning(|_| {
                Ok(RunOutcome {
                    output: String::new(),
                    exit_code: 0,
                    oom_killed: false,
                    wall_time: 0.2,
                })
            });
        sandbox
            .expect_run()
            .withf(|spec| spec.command.contains("cat"))
            .times(3)
            .returning(|_| {
                Ok(RunOutcome {
                    output: "hello\n--judgyse_static:time=0.05,amemory=512,pmemory=1024,return=0\n"
                        .to_string(),
                    exit_code: 0,
                    oom_killed: false,
                    wall_time: 0.06,
                })
            });

        let manager = manager_with(sandbox, &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;
        next_frame(&mut rx).await;

        manager.handle(r#"["command.code", "code"]"#).await;
        next_frame(&mut rx).await;

        for index in 1..=3 {
            manager
                .handle(&json!(["command.testcase", [index, "input", "hello"]]).to_string())
                .await;
            next_frame(&mut rx).await;
        }

        manager.handle(r#"["command.judge", null]"#).await;

        for index in 1..=3 {
            let frame = next_frame(&mut rx).await;
            assert_eq!(frame[0], "judge.result");
            assert_eq!(frame[1]["position"], index);
            assert_eq!(frame[1]["status"], 0);
            assert_eq!(frame[1]["point"], 1.0);
        }

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.overall");
        assert_eq!(frame[1], 0);

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.done");

        // Give the judge task a beat to restore idle state
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.status().await.status, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_compile_error_flow() {
        let root = TempDir::new().unwrap();

        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().times(1).returning(|_| {
            Ok(RunOutcome {
                output: "nope".to_string(),
                exit_code: 1,
                oom_killed: false,
                wall_time: 0.2,
            })
        });

        let manager = manager_with(sandbox, &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;
        next_frame(&mut rx).await;

        manager.handle(r#"["command.judge", null]"#).await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.error:compiler");
        assert_eq!(frame[1], "nope");

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.done");
    }

    #[tokio::test]
    async fn test_judge_without_session_reports_system_error() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(MockSandbox::new(), &root);
        let mut rx = connect(&manager).await;

        manager.handle(r#"["command.judge", null]"#).await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.error:system");
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame[0], "judge.done");
    }

    #[tokio::test]
    async fn test_disconnect_clears_session() {
        let root = TempDir::new().unwrap();
        let mut sandbox = MockSandbox::new();
        sandbox.expect_stop().returning(|| ());
        let manager = manager_with(sandbox, &root);
        let _rx = connect(&manager).await;

        manager.handle(r#"["command.start", null]"#).await;
        manager.handle(&init_payload()).await;

        manager.disconnect().await;
        assert!(manager.is_disconnected().await);
        assert!(manager.session.read().await.is_none());
    }
}

//! Application-wide constants
//!
//! This module contains all constant values used throughout the application.
//! Constants are grouped by their purpose for better organization.

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Default server host address
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default server port
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 3;

// =============================================================================
// SANDBOX DEFAULTS
// =============================================================================

/// Default memory cap for the compile step
pub const DEFAULT_COMPILER_MEM_LIMIT: &str = "1024m";

/// Default path of the GNU `time` binary
pub const DEFAULT_TIME_PATH: &str = "/usr/bin/time";

/// Default path of the `timeout` binary
pub const DEFAULT_TIMEOUT_PATH: &str = "/usr/bin/timeout";

/// Working directory inside an execution container
pub const CONTAINER_EXECUTION_DIR: &str = "/execution";

/// Working directory inside a compile container
pub const CONTAINER_COMPILE_DIR: &str = "/compile";

/// Mount point of the host `time` binary inside a container
pub const CONTAINER_TIME_PATH: &str = "/usr/bin/time";

// =============================================================================
// METER TRAILER
// =============================================================================

/// Literal sentinel that separates program output from the metric trailer
pub const METER_SENTINEL: &str = "--judgyse_static:";

/// `time(1)` format string for the local back-end (wall time from `%e`)
pub const METER_FORMAT_LOCAL: &str = "--judgyse_static:time=%e,amemory=%K,pmemory=%M,return=%x";

/// `time(1)` format string for the container back-end (wall time from inspect)
pub const METER_FORMAT_CONTAINER: &str = "--judgyse_static:amemory=%K,pmemory=%M,return=%x";

// =============================================================================
// STORAGE DEFAULTS
// =============================================================================

/// Default evaluation root, resolved relative to the working directory
pub const DEFAULT_EVALUATION_PATH: &str = "evaluation";

/// Default host mount point of the evaluation root when running inside Docker
pub const DEFAULT_JUDGYSE_DIR: &str = "/judgyse";

/// Default directory holding the catalogue JSON files
pub const DEFAULT_CATALOGUE_PATH: &str = "data";

/// Compiled artifacts and working files for the current submission
pub const EXECUTION_DIR: &str = "execution";

/// Per-index testcase input/expected-output pairs
pub const TESTCASES_DIR: &str = "testcases";

/// File name of an uploaded custom judger
pub const JUDGER_FILE: &str = "judger.py";

/// On-disk language table
pub const LANGUAGES_FILE: &str = "languages.json";

/// On-disk compiler table
pub const COMPILERS_FILE: &str = "compilers.json";

// =============================================================================
// WEBSOCKET CLOSE CODES
// =============================================================================

/// Normal closure
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// "Try Again Later", sent when a session is already connected
pub const WS_CLOSE_TRY_AGAIN_LATER: u16 = 1013;

// =============================================================================
// INBOUND COMMANDS
// =============================================================================

/// Client-to-server command names, as they appear on the wire
pub mod commands {
    pub const START: &str = "command.start";
    pub const INIT: &str = "command.init";
    pub const CODE: &str = "command.code";
    pub const JUDGER: &str = "command.judger";
    pub const TESTCASE: &str = "command.testcase";
    pub const JUDGE: &str = "command.judge";
    pub const STATUS: &str = "command.status";
    pub const ABORT: &str = "command.abort";
    pub const DECLARE_ENV: &str = "declare.env";
    pub const DECLARE_LANGUAGE: &str = "declare.language";
    pub const DECLARE_COMPILER: &str = "declare.compiler";
    pub const DECLARE_LOAD: &str = "declare.load";
    pub const CLOSE: &str = "close";
}

// =============================================================================
// OUTBOUND TOPICS
// =============================================================================

/// Server-to-client topic names
pub mod topics {
    pub const JUDGE_INIT: &str = "judge.init";
    pub const WRITE_CODE: &str = "judge.write:code";
    pub const WRITE_JUDGER: &str = "judge.write:judger";
    pub const WRITE_TESTCASE: &str = "judge.write:testcase";
    pub const JUDGE_COMPILER: &str = "judge.compiler";
    pub const JUDGE_RESULT: &str = "judge.result";
    pub const JUDGE_OVERALL: &str = "judge.overall";
    pub const JUDGE_ABORTED: &str = "judge.aborted";
    pub const JUDGE_ERROR_COMPILER: &str = "judge.error:compiler";
    pub const JUDGE_ERROR_SYSTEM: &str = "judge.error:system";
    pub const JUDGE_DONE: &str = "judge.done";
    pub const STATUS: &str = "status";
    pub const ABORT: &str = "abort";
    pub const UNKNOWN: &str = "unknown";
}

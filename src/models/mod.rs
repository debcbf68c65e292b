//! Domain models

pub mod session;
pub mod verdict;

pub use session::{JudgeMode, JudgeSession, Limit, TestType};
pub use verdict::{JudgeEvent, JudgeResult, SessionState, SessionStatus, StatusCode};

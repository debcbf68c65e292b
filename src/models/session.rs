//! Judge session model
//!
//! A `JudgeSession` is everything one client submission carries: which
//! language/compiler pair to use, the testcase range and file names, the
//! comparison mode, and the resource limits. It is parsed from the
//! `command.init` payload with per-field shape validation so that a bad
//! client gets told exactly which field is wrong.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// How testcase input reaches the program and where output is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// Input/output via files in the execution directory
    File,
    /// Input piped to stdin, output captured from stdout
    Std,
}

/// Comparison mode for program output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeMode {
    /// 0 = built-in diff, 1 = custom judger
    pub mode: u8,
    /// Drop empty lines from both sides before comparing
    #[serde(default)]
    pub trim_endl: bool,
    /// Case-fold both sides before comparing
    #[serde(default)]
    pub case: bool,
}

/// Resource limits for one testcase run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    /// Wall-clock limit in seconds
    pub time: f64,
    /// Memory cap as a size string like "256m"
    pub memory: String,
}

/// All state associated with one client's submission
#[derive(Debug, Clone)]
pub struct JudgeSession {
    pub submission_id: String,
    /// Language name and optional version (rendered into compile commands)
    pub language: (String, Option<String>),
    /// Compiler name and version tag ("latest" or a concrete version)
    pub compiler: (String, String),
    /// Inclusive testcase index range
    pub test_range: (u32, u32),
    /// Input and expected-output file names
    pub test_file: (String, String),
    pub test_type: TestType,
    pub judge_mode: JudgeMode,
    pub limit: Limit,
    /// Total points distributed equally over accepted testcases
    pub point: f64,
}

impl JudgeSession {
    /// Parse and validate a session from the `command.init` payload
    pub fn from_value(data: &Value) -> AppResult<Self> {
        let submission_id = required_str(data, "submission_id")?;

        let language = required_pair(data, "language")?;
        let language = (
            as_str(language.0, "language")?,
            version_tag(language.1),
        );

        let compiler = required_pair(data, "compiler")?;
        let compiler = (
            as_str(compiler.0, "compiler")?,
            version_tag(compiler.1).unwrap_or_else(|| "latest".to_string()),
        );

        let test_range = required_pair(data, "test_range")?;
        let test_range = (as_index(test_range.0, "test_range")?, as_index(test_range.1, "test_range")?);
        if test_range.0 > test_range.1 {
            return Err(AppError::InvalidField("test_range".to_string()));
        }

        let test_file = required_pair(data, "test_file")?;
        let test_file = (as_str(test_file.0, "test_file")?, as_str(test_file.1, "test_file")?);

        let test_type: TestType = parse_field(data, "test_type")?;
        let judge_mode: JudgeMode = parse_field(data, "judge_mode")?;
        let limit: Limit = parse_field(data, "limit")?;

        let point = match data.get("point") {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| AppError::InvalidField("point".to_string()))?,
            None => 1.0,
        };

        Ok(Self {
            submission_id,
            language,
            compiler,
            test_range,
            test_file,
            test_type,
            judge_mode,
            limit,
            point,
        })
    }

    /// Whether an index lies within the inclusive testcase range
    pub fn contains(&self, index: i64) -> bool {
        index >= self.test_range.0 as i64 && index <= self.test_range.1 as i64
    }

    /// Number of testcases in the range
    pub fn testcase_count(&self) -> u32 {
        self.test_range.1 - self.test_range.0 + 1
    }
}

fn required<'a>(data: &'a Value, name: &str) -> AppResult<&'a Value> {
    data.get(name)
        .ok_or_else(|| AppError::MissingField(name.to_string()))
}

fn required_str(data: &Value, name: &str) -> AppResult<String> {
    as_str(required(data, name)?, name)
}

fn required_pair<'a>(data: &'a Value, name: &str) -> AppResult<(&'a Value, &'a Value)> {
    let array = required(data, name)?
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| AppError::InvalidField(name.to_string()))?;
    Ok((&array[0], &array[1]))
}

fn as_str(value: &Value, name: &str) -> AppResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidField(name.to_string()))
}

fn as_index(value: &Value, name: &str) -> AppResult<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| AppError::InvalidField(name.to_string()))
}

// Version tags arrive as strings, numbers, or null depending on the client
fn version_tag(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(data: &Value, name: &str) -> AppResult<T> {
    serde_json::from_value(required(data, name)?.clone())
        .map_err(|_| AppError::InvalidField(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "submission_id": "sub-1",
            "language": ["cpp", 17],
            "compiler": ["gcc", "latest"],
            "test_range": [1, 3],
            "test_file": ["input.txt", "output.txt"],
            "test_type": "std",
            "judge_mode": {"mode": 0, "trim_endl": true, "case": false},
            "limit": {"time": 1.5, "memory": "256m"},
            "point": 3.0
        })
    }

    #[test]
    fn test_parse_valid_session() {
        let session = JudgeSession::from_value(&valid_payload()).unwrap();
        assert_eq!(session.submission_id, "sub-1");
        assert_eq!(session.language, ("cpp".to_string(), Some("17".to_string())));
        assert_eq!(session.compiler.1, "latest");
        assert_eq!(session.test_range, (1, 3));
        assert_eq!(session.test_type, TestType::Std);
        assert!(session.judge_mode.trim_endl);
        assert_eq!(session.limit.time, 1.5);
        assert_eq!(session.point, 3.0);
        assert_eq!(session.testcase_count(), 3);
    }

    #[test]
    fn test_missing_field() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("limit");

        let err = JudgeSession::from_value(&payload).unwrap_err();
        assert_eq!(err.error_code(), "missing_field");
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_invalid_field_shape() {
        let mut payload = valid_payload();
        payload["test_range"] = json!([3, 1]);
        let err = JudgeSession::from_value(&payload).unwrap_err();
        assert_eq!(err.error_code(), "invalid_field");

        let mut payload = valid_payload();
        payload["test_type"] = json!("interactive");
        let err = JudgeSession::from_value(&payload).unwrap_err();
        assert_eq!(err.error_code(), "invalid_field");
    }

    #[test]
    fn test_point_defaults_to_one() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("point");
        let session = JudgeSession::from_value(&payload).unwrap();
        assert_eq!(session.point, 1.0);
    }

    #[test]
    fn test_range_membership() {
        let session = JudgeSession::from_value(&valid_payload()).unwrap();
        assert!(session.contains(1));
        assert!(session.contains(3));
        assert!(!session.contains(0));
        assert!(!session.contains(99));
    }
}

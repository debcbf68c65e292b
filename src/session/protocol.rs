//! Session wire protocol
//!
//! Every frame is a JSON 2-tuple. Inbound: `[command, data]` where `data`
//! may itself be a JSON-encoded string (decoded once, left as-is when the
//! decode fails). Outbound: `[topic, payload]`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// A decoded inbound frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: String,
    pub data: Value,
}

/// Parse an inbound `[command, data]` frame
pub fn parse_frame(text: &str) -> AppResult<Frame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| AppError::InvalidField(format!("frame is not JSON: {e}")))?;

    let array = value
        .as_array()
        .filter(|array| array.len() >= 2)
        .ok_or_else(|| AppError::InvalidField("frame is not a [command, data] pair".to_string()))?;

    let command = array[0]
        .as_str()
        .ok_or_else(|| AppError::InvalidField("frame command is not a string".to_string()))?
        .to_string();

    Ok(Frame {
        command,
        data: decode_once(array[1].clone()),
    })
}

// Clients sometimes double-encode the payload; unwrap one level
fn decode_once(data: Value) -> Value {
    match &data {
        Value::String(text) => serde_json::from_str(text).unwrap_or(data),
        _ => data,
    }
}

/// Serialize an outbound `[topic, payload]` frame
pub fn make_frame<T: Serialize>(topic: &str, payload: &T) -> String {
    serde_json::to_string(&(topic, payload)).expect("outbound frame serialization cannot fail")
}

/// Serialize an outbound frame with no payload, `[topic]`
pub fn make_bare_frame(topic: &str) -> String {
    serde_json::to_string(&(topic,)).expect("outbound frame serialization cannot fail")
}

/// Success acknowledgement, `{status: 0}` plus an optional testcase index
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub status: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: 0,
            index: None,
        }
    }

    pub fn ok_index(index: i64) -> Self {
        Self {
            status: 0,
            index: Some(index),
        }
    }
}

/// Failure reply, `{status: 1, code, error}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    pub status: u8,
    pub code: &'static str,
    pub error: String,
}

impl ErrorReply {
    pub fn from_error(error: &AppError) -> Self {
        Self {
            status: 1,
            code: error.error_code(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_frame() {
        let frame = parse_frame(r#"["command.status", null]"#).unwrap();
        assert_eq!(frame.command, "command.status");
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_parse_decodes_nested_json_once() {
        let frame = parse_frame(r#"["command.init", "{\"submission_id\": \"s1\"}"]"#).unwrap();
        assert_eq!(frame.data["submission_id"], "s1");
    }

    #[test]
    fn test_parse_keeps_plain_string_data() {
        let frame = parse_frame(r#"["command.code", "print(42)"]"#).unwrap();
        assert_eq!(frame.data, json!("print(42)"));
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"command": "x"}"#).is_err());
        assert!(parse_frame(r#"["lonely"]"#).is_err());
        assert!(parse_frame(r#"[42, "data"]"#).is_err());
    }

    #[test]
    fn test_make_frame() {
        assert_eq!(
            make_frame("judge.init", &Ack::ok()),
            r#"["judge.init",{"status":0}]"#
        );
        assert_eq!(
            make_frame("judge.write:testcase", &Ack::ok_index(2)),
            r#"["judge.write:testcase",{"status":0,"index":2}]"#
        );
        assert_eq!(make_bare_frame("judge.done"), r#"["judge.done"]"#);
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = ErrorReply::from_error(&AppError::InvalidTestcaseIndex(99));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], 1);
        assert_eq!(json["code"], "invalid_testcase_count");
        assert_eq!(json["error"], "invalid testcase index: 99");
    }
}

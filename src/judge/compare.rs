//! Output comparison
//!
//! Built-in diffing operates on the raw output/expected strings with two
//! normalisation flags. Custom judging hands both strings plus run metadata
//! to a user-supplied script and parses the verdict it prints; the script
//! receives everything as one JSON object on stdin, never through shell
//! interpolation, and can never alter the measured time/memory of the run.

use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::{JudgeMode, StatusCode};

/// Built-in diff (mode 0)
pub fn builtin_compare(output: &str, expected: &str, mode: &JudgeMode) -> bool {
    let mut output = output.to_string();
    let mut expected = expected.to_string();

    if mode.trim_endl {
        output = drop_empty_lines(&output);
        expected = drop_empty_lines(&expected);
    }
    if mode.case {
        output = output.to_lowercase();
        expected = expected.to_lowercase();
    }

    output == expected
}

fn drop_empty_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run metadata handed to a custom judger
#[derive(Debug, Clone, Serialize)]
pub struct JudgerMetadata {
    pub index: u32,
    pub point: f64,
    pub language: String,
    pub time: Option<f64>,
    pub memory: Option<(f64, f64)>,
}

/// The stdin payload for one custom-judger invocation
pub fn judger_payload(output: &str, expected: &str, metadata: &JudgerMetadata) -> String {
    serde_json::json!({
        "output": output,
        "expect": expected,
        "metadata": metadata,
    })
    .to_string()
}

/// Verdict decided by a custom judger
#[derive(Debug, Clone, PartialEq)]
pub struct JudgerVerdict {
    pub status: StatusCode,
    pub point: f64,
    pub feedback: Option<String>,
}

/// Parse what a custom judger printed.
///
/// Accepted forms: a bare boolean (`true`/`false`, Python spellings
/// included) meaning accepted/rejected with the full/zero point, or an
/// object `{status, point, feedback?}` passed through as the verdict.
pub fn parse_judger_output(printed: &str, full_point: f64) -> AppResult<JudgerVerdict> {
    let trimmed = printed.trim();

    let as_bool = match trimmed {
        "True" | "true" => Some(true),
        "False" | "false" => Some(false),
        _ => None,
    };
    if let Some(accepted) = as_bool {
        return Ok(if accepted {
            JudgerVerdict {
                status: StatusCode::Accepted,
                point: full_point,
                feedback: None,
            }
        } else {
            JudgerVerdict {
                status: StatusCode::WrongAnswer,
                point: 0.0,
                feedback: None,
            }
        });
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|_| AppError::Judger(format!("unparseable judger verdict: {trimmed}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| AppError::Judger(format!("judger verdict is not an object: {trimmed}")))?;

    let status = object
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|code| u8::try_from(code).ok())
        .and_then(StatusCode::from_code)
        .ok_or_else(|| AppError::Judger("judger verdict is missing status".to_string()))?;

    let point = object
        .get("point")
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::Judger("judger verdict is missing point".to_string()))?;

    let feedback = object
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(JudgerVerdict {
        status,
        point,
        feedback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(trim_endl: bool, case: bool) -> JudgeMode {
        JudgeMode {
            mode: 0,
            trim_endl,
            case,
        }
    }

    #[test]
    fn test_exact_match() {
        assert!(builtin_compare("a\nb", "a\nb", &mode(false, false)));
        assert!(!builtin_compare("a\nb", "a\nc", &mode(false, false)));
    }

    #[test]
    fn test_trim_endl_drops_empty_lines() {
        assert!(builtin_compare("a\n\nb\n", "a\nb", &mode(true, false)));
        assert!(!builtin_compare("a\n\nb\n", "a\nb", &mode(false, false)));
    }

    #[test]
    fn test_case_fold() {
        assert!(builtin_compare("HELLO", "hello", &mode(false, true)));
        assert!(!builtin_compare("HELLO", "hello", &mode(false, false)));
    }

    #[test]
    fn test_judger_bool_verdicts() {
        let verdict = parse_judger_output("True\n", 2.0).unwrap();
        assert_eq!(verdict.status, StatusCode::Accepted);
        assert_eq!(verdict.point, 2.0);

        let verdict = parse_judger_output("false", 2.0).unwrap();
        assert_eq!(verdict.status, StatusCode::WrongAnswer);
        assert_eq!(verdict.point, 0.0);
    }

    #[test]
    fn test_judger_object_verdict() {
        let verdict = parse_judger_output(
            r#"{"status": 1, "point": 0.5, "feedback": "close but wrong"}"#,
            2.0,
        )
        .unwrap();
        assert_eq!(verdict.status, StatusCode::WrongAnswer);
        assert_eq!(verdict.point, 0.5);
        assert_eq!(verdict.feedback.as_deref(), Some("close but wrong"));
    }

    #[test]
    fn test_judger_missing_fields_is_error() {
        let err = parse_judger_output(r#"{"status": 0}"#, 1.0).unwrap_err();
        assert_eq!(err.error_code(), "judger_error");
        assert_eq!(err.status_code(), StatusCode::SystemError);

        let err = parse_judger_output(r#"{"point": 1.0}"#, 1.0).unwrap_err();
        assert_eq!(err.error_code(), "judger_error");
    }

    #[test]
    fn test_judger_garbage_is_error() {
        assert!(parse_judger_output("maybe?", 1.0).is_err());
        assert!(parse_judger_output("[0, 1]", 1.0).is_err());
    }

    #[test]
    fn test_judger_payload_is_structured() {
        let metadata = JudgerMetadata {
            index: 2,
            point: 1.0,
            language: "cpp".to_string(),
            time: Some(0.1),
            memory: Some((1.0, 2.0)),
        };
        // Quoting-hostile output must survive as plain JSON data
        let payload = judger_payload("evil\" ; rm -rf $HOME", "expected", &metadata);
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["output"], "evil\" ; rm -rf $HOME");
        assert_eq!(parsed["metadata"]["index"], 2);
    }
}

//! Resource metering
//!
//! Runs are wrapped with GNU `time(1)` using a custom format that appends a
//! sentinel trailer carrying CPU time, resident memory, and the exit code of
//! the metered program. This module builds the wrapper command and parses
//! the trailer back out of the combined output.

use std::collections::HashMap;
use std::path::Path;

use crate::constants::{METER_FORMAT_CONTAINER, METER_FORMAT_LOCAL, METER_SENTINEL};
use crate::error::{AppError, AppResult};

/// Metrics recovered from a metered run
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    /// Program output preceding the sentinel
    pub stdout: String,
    /// Wall time in seconds (`%e`; absent in container mode)
    pub time: Option<f64>,
    /// Average and peak resident size in MiB
    pub memory: Option<(f64, f64)>,
    /// Exit code of the metered program (`%x`)
    pub exit_code: Option<i64>,
}

/// Prepend the `time(1)` meter wrapper to a command.
///
/// The local back-end takes wall time from `%e`; the container back-end
/// takes it from the sandbox's own timestamps, so `%e` is omitted there.
pub fn wrap_with_meter(command: &str, time_path: &Path, include_wall_time: bool) -> String {
    let format = if include_wall_time {
        METER_FORMAT_LOCAL
    } else {
        METER_FORMAT_CONTAINER
    };
    format!("{} --format=\"{}\" {}", time_path.display(), format, command)
}

/// Split combined output at the last sentinel occurrence and parse the
/// trailing `k=v,k=v,…` map.
///
/// Output with no sentinel (the program was killed before `time` could
/// report) parses to a reading with no metrics.
pub fn parse_meter(combined: &str) -> MeterReading {
    let Some(at) = combined.rfind(METER_SENTINEL) else {
        return MeterReading {
            stdout: combined.to_string(),
            time: None,
            memory: None,
            exit_code: None,
        };
    };

    let stdout = combined[..at].to_string();
    let trailer = combined[at + METER_SENTINEL.len()..].trim_end();

    let fields: HashMap<&str, &str> = trailer
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .collect();

    let time = fields.get("time").and_then(|v| v.parse::<f64>().ok());
    let amemory = fields.get("amemory").and_then(|v| v.parse::<f64>().ok());
    let pmemory = fields.get("pmemory").and_then(|v| v.parse::<f64>().ok());
    // time(1) reports kilobytes; the wire unit is MiB
    let memory = match (amemory, pmemory) {
        (Some(avg), Some(peak)) => Some((avg / 1024.0, peak / 1024.0)),
        _ => None,
    };
    let exit_code = fields.get("return").and_then(|v| v.parse::<i64>().ok());

    MeterReading {
        stdout,
        time,
        memory,
        exit_code,
    }
}

/// Parse a memory-size string (`^[0-9]+[KMG]$`, case-insensitive) to bytes
pub fn mem_convert(mem: &str) -> AppResult<u64> {
    let upper = mem.trim().to_uppercase();
    if !upper.is_ascii() || upper.is_empty() {
        return Err(AppError::InvalidField(format!("memory size: {mem}")));
    }
    let (digits, unit) = upper.split_at(upper.len() - 1);

    let multiplier: u64 = match unit {
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        _ => return Err(AppError::InvalidField(format!("memory size: {mem}"))),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidField(format!("memory size: {mem}")));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| AppError::InvalidField(format!("memory size: {mem}")))?;
    Ok(value * multiplier)
}

/// Memory-size string to KiB, the unit `ulimit -v` takes
pub fn mem_convert_kib(mem: &str) -> AppResult<u64> {
    Ok(mem_convert(mem)? / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_trailer() {
        let reading =
            parse_meter("abc\n--judgyse_static:time=0.12,amemory=2048,pmemory=4096,return=0\n");
        assert_eq!(reading.stdout, "abc\n");
        assert_eq!(reading.time, Some(0.12));
        assert_eq!(reading.memory, Some((2.0, 4.0)));
        assert_eq!(reading.exit_code, Some(0));
    }

    #[test]
    fn test_parse_without_wall_time() {
        let reading = parse_meter("out\n--judgyse_static:amemory=1024,pmemory=1024,return=1\n");
        assert_eq!(reading.stdout, "out\n");
        assert_eq!(reading.time, None);
        assert_eq!(reading.memory, Some((1.0, 1.0)));
        assert_eq!(reading.exit_code, Some(1));
    }

    #[test]
    fn test_parse_uses_last_sentinel() {
        // A program printing the sentinel itself must not shadow the trailer
        let reading = parse_meter(
            "--judgyse_static:fake\n--judgyse_static:time=1.5,amemory=0,pmemory=0,return=0\n",
        );
        assert_eq!(reading.stdout, "--judgyse_static:fake\n");
        assert_eq!(reading.time, Some(1.5));
    }

    #[test]
    fn test_parse_no_sentinel() {
        let reading = parse_meter("killed before time could report");
        assert_eq!(reading.stdout, "killed before time could report");
        assert_eq!(reading.time, None);
        assert_eq!(reading.memory, None);
        assert_eq!(reading.exit_code, None);
    }

    #[test]
    fn test_mem_convert() {
        assert_eq!(mem_convert("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(mem_convert("512k").unwrap(), 512 * 1024);
        assert_eq!(mem_convert("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(mem_convert("256").is_err());
        assert!(mem_convert("m").is_err());
        assert!(mem_convert("12mb").is_err());
        assert!(mem_convert("-1m").is_err());
    }

    #[test]
    fn test_mem_convert_kib() {
        assert_eq!(mem_convert_kib("256m").unwrap(), 256 * 1024);
    }

    #[test]
    fn test_wrap_with_meter() {
        let wrapped = wrap_with_meter("./solution", &PathBuf::from("/usr/bin/time"), true);
        assert!(wrapped.starts_with("/usr/bin/time --format=\"--judgyse_static:time=%e"));
        assert!(wrapped.ends_with("./solution"));

        let wrapped = wrap_with_meter("./solution", &PathBuf::from("/usr/bin/time"), false);
        assert!(!wrapped.contains("time=%e"));
    }
}

//! Heartbeat log line format
//!
//! Workers append one of these lines to their log periodically. Timestamps
//! are written in host-local time with millisecond precision.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const HEARTBEAT_PATTERN: &str = r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}),\d+ - freqtrade\.worker - INFO - Bot heartbeat\. PID=(\d+), version='([^']+)', state='(\w+)'";

static HEARTBEAT_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn heartbeat_regex() -> Option<&'static Regex> {
    HEARTBEAT_RE
        .get_or_init(|| Regex::new(HEARTBEAT_PATTERN).ok())
        .as_ref()
}

/// One parsed heartbeat record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatLine {
    pub time: DateTime<Utc>,
    pub pid: u32,
    pub version: String,
    pub state: String,
}

/// Parse a single log line; `None` when it is not a heartbeat
pub fn parse_heartbeat_line(line: &str) -> Option<HeartbeatLine> {
    let caps = heartbeat_regex()?.captures(line)?;

    let naive = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
    let time = Local
        .from_local_datetime(&naive)
        .earliest()?
        .with_timezone(&Utc);

    Some(HeartbeatLine {
        time,
        pid: caps[2].parse().ok()?,
        version: caps[3].to_string(),
        state: caps[4].to_string(),
    })
}

/// Most recent heartbeat in a chunk of log text
pub fn last_heartbeat_in(text: &str) -> Option<HeartbeatLine> {
    text.lines().rev().find_map(parse_heartbeat_line)
}

/// Render a heartbeat line (without trailing newline)
pub fn format_heartbeat_line(time: DateTime<Utc>, pid: u32, version: &str, state: &str) -> String {
    let local = time.with_timezone(&Local);
    format!(
        "{},{:03} - freqtrade.worker - INFO - Bot heartbeat. PID={pid}, version='{version}', state='{state}'",
        local.format(TIMESTAMP_FORMAT),
        local.timestamp_subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_known_line() {
        let line = "2024-03-01 10:15:30,123 - freqtrade.worker - INFO - Bot heartbeat. PID=4242, version='2024.1', state='RUNNING'";
        let hb = parse_heartbeat_line(line).unwrap();

        assert_eq!(hb.pid, 4242);
        assert_eq!(hb.version, "2024.1");
        assert_eq!(hb.state, "RUNNING");

        let local = hb.time.with_timezone(&Local);
        assert_eq!(local.format(TIMESTAMP_FORMAT).to_string(), "2024-03-01 10:15:30");
    }

    #[test]
    fn test_non_heartbeat_lines_are_ignored() {
        assert!(parse_heartbeat_line("2024-03-01 10:15:30,123 - freqtrade - INFO - Starting").is_none());
        assert!(parse_heartbeat_line("").is_none());
    }

    #[test]
    fn test_formatted_line_parses() {
        let now = Utc::now().with_nanosecond(0).unwrap();
        let line = format_heartbeat_line(now, 77, "stub", "RUNNING");
        let hb = parse_heartbeat_line(&line).unwrap();

        assert_eq!(hb.time, now);
        assert_eq!(hb.pid, 77);
        assert_eq!(hb.state, "RUNNING");
    }

    #[test]
    fn test_last_heartbeat_wins() {
        let first = format_heartbeat_line(Utc::now(), 1, "v", "RUNNING");
        let second = format_heartbeat_line(Utc::now(), 2, "v", "STOPPED");
        let text = format!("{first}\nsome other output\n{second}\ntrailing noise\n");

        let hb = last_heartbeat_in(&text).unwrap();
        assert_eq!(hb.pid, 2);
        assert_eq!(hb.state, "STOPPED");
    }
}

//! Heartbeat policy, per-worker heartbeat state and the offset-tracking log tail

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use shared::{last_heartbeat_in, HeartbeatLine, WorkerId};

/// Bytes scanned on the first read of a log
pub const INITIAL_TAIL_BYTES: u64 = 64 * 1024;

/// Persisted monitoring policy for one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPolicy {
    pub worker_id: WorkerId,
    pub enabled: bool,
    pub timeout_secs: u64,
    pub check_interval_secs: u64,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_cooldown_secs: u64,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            worker_id: WorkerId(0),
            enabled: true,
            timeout_secs: 300,
            check_interval_secs: 30,
            auto_restart: true,
            max_restart_attempts: 3,
            restart_cooldown_secs: 60,
        }
    }
}

impl HeartbeatPolicy {
    /// Defaults bound to a specific worker
    pub fn for_worker(worker_id: WorkerId, defaults: &HeartbeatPolicy) -> Self {
        Self {
            worker_id,
            ..defaults.clone()
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn timeout(&self) -> ChronoDuration {
        seconds(self.timeout_secs)
    }

    pub fn cooldown(&self) -> ChronoDuration {
        seconds(self.restart_cooldown_secs)
    }
}

/// Whole seconds as a chrono duration, capped at about a century
fn seconds(secs: u64) -> ChronoDuration {
    const MAX_SECS: u64 = 100 * 365 * 24 * 3600;
    ChronoDuration::seconds(secs.min(MAX_SECS) as i64)
}

/// In-memory heartbeat state of a monitored worker
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatState {
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    pub last_pid: Option<u32>,
    pub last_version: Option<String>,
    pub last_state: Option<String>,
    pub is_abnormal: bool,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
    /// Staleness anchor while no heartbeat has been seen
    pub grace_anchor: DateTime<Utc>,
    pub max_attempts_alerted: bool,
}

impl HeartbeatState {
    pub fn new(registered_at: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat_time: None,
            last_pid: None,
            last_version: None,
            last_state: None,
            is_abnormal: false,
            consecutive_failures: 0,
            restart_count: 0,
            last_restart_time: None,
            grace_anchor: registered_at,
            max_attempts_alerted: false,
        }
    }

    /// Record a heartbeat line; older lines never move the clock back
    pub fn observe(&mut self, line: &HeartbeatLine) -> bool {
        if matches!(self.last_heartbeat_time, Some(t) if t >= line.time) {
            return false;
        }
        self.last_heartbeat_time = Some(line.time);
        self.last_pid = Some(line.pid);
        self.last_version = Some(line.version.clone());
        self.last_state = Some(line.state.clone());
        true
    }

    /// Time since the last heartbeat, or since registration if none was seen
    pub fn staleness(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.last_heartbeat_time.unwrap_or(self.grace_anchor)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        self.staleness(now) > timeout
    }

    /// Whether a restart issued at `now` would still fall inside the cooldown window
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: ChronoDuration) -> bool {
        matches!(self.last_restart_time, Some(t) if now - t < cooldown)
    }

    /// Forget the previous process after a restart
    pub fn reset_after_restart(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_time = None;
        self.grace_anchor = now;
    }
}

/// One heartbeat-history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub worker_id: WorkerId,
    pub heartbeat_time: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub version: Option<String>,
    pub state: Option<String>,
    pub is_timeout: bool,
    pub time_since_last_secs: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

/// One restart-history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub worker_id: WorkerId,
    pub reason: String,
    pub restart_time: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    pub previous_pid: Option<u32>,
    pub new_pid: Option<u32>,
}

/// Point-in-time reader of the bytes appended to a log since the last read
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: Option<u64>,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Complete lines appended since the previous call
    ///
    /// A missing file yields nothing. A file shorter than the saved offset was
    /// rotated or truncated and is read from the start.
    pub async fn read_new(&mut self) -> std::io::Result<String> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        let (start, first_read) = match self.offset {
            None => (len.saturating_sub(INITIAL_TAIL_BYTES), true),
            Some(offset) if offset > len => (0, false),
            Some(offset) => (offset, false),
        };

        if start >= len {
            self.offset = Some(len);
            return Ok(String::new());
        }

        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = Vec::with_capacity(usize::try_from(len - start).unwrap_or(0));
        file.take(len - start).read_to_end(&mut buf).await?;

        // Keep a trailing partial line for the next read
        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            self.offset = Some(start);
            return Ok(String::new());
        };
        self.offset = Some(start + last_newline as u64 + 1);
        buf.truncate(last_newline + 1);

        // A window that starts mid-file starts mid-line
        let body = if first_read && start > 0 {
            match buf.iter().position(|b| *b == b'\n') {
                Some(first_newline) => &buf[first_newline + 1..],
                None => &buf[..0],
            }
        } else {
            &buf[..]
        };

        Ok(String::from_utf8_lossy(body).into_owned())
    }

    /// Latest heartbeat among the newly appended lines
    pub async fn latest_heartbeat(&mut self) -> std::io::Result<Option<HeartbeatLine>> {
        let text = self.read_new().await?;
        Ok(last_heartbeat_in(&text))
    }

    /// Start over from the end window on the next read
    pub fn reset(&mut self) {
        self.offset = None;
    }
}

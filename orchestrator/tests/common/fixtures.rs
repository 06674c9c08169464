//! Test fixtures and constants
//!
//! Centralized values so the suites agree on ids, timings and specs.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;

use orchestrator::HeartbeatPolicy;
use shared::{DesiredStateRecord, WorkerId, WorkerSpec};

/// Common test data
pub struct TestFixtures;

impl TestFixtures {
    pub const WORKER_ID: u32 = 7;
    pub const STRATEGY: &'static str = "SampleStrategy";

    pub const HEARTBEAT_TIMEOUT_SECS: u64 = 10;
    pub const RESTART_COOLDOWN_SECS: u64 = 60;
    pub const MAX_RESTART_ATTEMPTS: u32 = 3;

    /// Long enough that the periodic checker never fires during a test
    pub const CHECK_INTERVAL_SECS: u64 = 3600;

    /// Command standing in for a real worker binary
    pub const WORKER_COMMAND: &'static str = "sleep 300";

    pub fn worker_id() -> WorkerId {
        WorkerId(Self::WORKER_ID)
    }

    pub fn spec(id: u32) -> WorkerSpec {
        WorkerSpec::new(id, Self::STRATEGY)
    }

    /// Record claiming a running worker, as a crashed control plane leaves it
    pub fn running_record(id: u32, port: u16, pid: Option<u32>) -> DesiredStateRecord {
        let mut record = DesiredStateRecord::new(Self::spec(id));
        record.mark_running(port, pid, Utc::now() - ChronoDuration::hours(1));
        record
    }

    pub fn stopped_record(id: u32) -> DesiredStateRecord {
        DesiredStateRecord::new(Self::spec(id))
    }

    /// Default policy with short timeouts and no periodic interference
    pub fn policy() -> HeartbeatPolicy {
        HeartbeatPolicy {
            timeout_secs: Self::HEARTBEAT_TIMEOUT_SECS,
            check_interval_secs: Self::CHECK_INTERVAL_SECS,
            restart_cooldown_secs: Self::RESTART_COOLDOWN_SECS,
            max_restart_attempts: Self::MAX_RESTART_ATTEMPTS,
            ..HeartbeatPolicy::default()
        }
    }

    /// Heartbeat lines carry whole seconds only
    pub fn whole_second_now() -> DateTime<Utc> {
        let now = Utc::now();
        now.with_nanosecond(0).unwrap_or(now)
    }

    pub fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    pub fn startup_timeout() -> Duration {
        Duration::from_millis(400)
    }
}

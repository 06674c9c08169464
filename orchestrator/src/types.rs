//! Read-only projections handed to callers of the fleet manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use shared::{WorkerId, WorkerStatus};

use crate::error::FailureReason;
use crate::traits::ResourceSnapshot;

/// Public view of a registered worker; the process handle itself never leaves the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub port: u16,
    pub pid: Option<u32>,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Terminal result of a start or stop request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub reason: Option<FailureReason>,
}

impl WorkerOutcome {
    pub fn running(info: &WorkerInfo) -> Self {
        Self {
            worker_id: info.worker_id,
            status: WorkerStatus::Running,
            port: Some(info.port),
            pid: info.pid,
            reason: None,
        }
    }

    pub fn stopped(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Stopped,
            port: None,
            pid: None,
            reason: None,
        }
    }

    pub fn failed(worker_id: WorkerId, reason: FailureReason) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Error,
            port: None,
            pid: None,
            reason: Some(reason),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkerStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    NotRunning,
    ProcessDead,
    ApiUnhealthy,
    ProcessInaccessible,
}

/// Result of the three-stage worker health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub worker_id: WorkerId,
    pub status: HealthStatus,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub exit_code: Option<i32>,
    pub resources: Option<ResourceSnapshot>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(worker_id: WorkerId, status: HealthStatus) -> Self {
        Self {
            worker_id,
            status,
            pid: None,
            port: None,
            exit_code: None,
            resources: None,
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityInfo {
    pub max_workers: usize,
    pub running_workers: usize,
    pub available_slots: usize,
    pub utilization_percent: f64,
    pub port_range: (u16, u16),
    pub can_start_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortPoolStatus {
    pub total_ports: usize,
    pub available: usize,
    pub allocated: usize,
    pub running_workers: usize,
    pub port_range: (u16, u16),
    pub utilization_percent: f64,
}

/// Round to two decimals for display
pub(crate) fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1000, 1000), 100.0);
    }
}

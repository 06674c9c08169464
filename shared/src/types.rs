//! Core shared types and identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::SharedError;

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Identity used when nothing called `init_*` (library use, tests)
static UNINITIALIZED: ProcessId = ProcessId::Orchestrator;

/// Process identifier for any component in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The control plane
    Orchestrator,
    /// The reverse-proxy gateway
    Gateway,
    /// A managed worker process
    Worker(u32),
}

impl ProcessId {
    pub fn init_orchestrator() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Orchestrator)
    }

    pub fn init_gateway() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Gateway)
    }

    pub fn init_worker(id: u32) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Worker(id))
    }

    /// Get the global process ID, falling back to `orchestrator`
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get().unwrap_or(&UNINITIALIZED)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Orchestrator => write!(f, "orchestrator"),
            ProcessId::Gateway => write!(f, "gateway"),
            ProcessId::Worker(id) => write!(f, "worker_{id}"),
        }
    }
}

/// Identifier of a managed worker (the strategy id in the control plane)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkerId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(WorkerId)
            .map_err(|_| SharedError::InvalidWorkerId { input: s.to_string() })
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        WorkerId(id)
    }
}

/// Desired/observed lifecycle status persisted per worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything needed to launch one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: WorkerId,
    pub name: String,
    pub strategy_class: String,
    #[serde(default = "WorkerSpec::default_version")]
    pub version: String,
    pub exchange: String,
    pub timeframe: String,
    pub pair_whitelist: Vec<String>,
    #[serde(default)]
    pub pair_blacklist: Vec<String>,
    #[serde(default = "WorkerSpec::default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "WorkerSpec::default_wallet")]
    pub dry_run_wallet: f64,
    #[serde(default)]
    pub stake_amount: Option<f64>,
    #[serde(default = "WorkerSpec::default_max_open_trades")]
    pub max_open_trades: u32,
    #[serde(default)]
    pub proxy_id: Option<u32>,
}

impl WorkerSpec {
    /// Minimal dry-run spec, mostly useful for tests and the stub worker
    pub fn new(id: u32, strategy_class: impl Into<String>) -> Self {
        let id = WorkerId(id);
        Self {
            id,
            name: format!("strategy-{id}"),
            strategy_class: strategy_class.into(),
            version: Self::default_version(),
            exchange: "binance".to_string(),
            timeframe: "5m".to_string(),
            pair_whitelist: vec!["BTC/USDT".to_string()],
            pair_blacklist: Vec::new(),
            dry_run: Self::default_dry_run(),
            dry_run_wallet: Self::default_wallet(),
            stake_amount: None,
            max_open_trades: Self::default_max_open_trades(),
            proxy_id: None,
        }
    }

    fn default_version() -> String {
        "v1.0".to_string()
    }

    fn default_dry_run() -> bool {
        true
    }

    fn default_wallet() -> f64 {
        1000.0
    }

    fn default_max_open_trades() -> u32 {
        3
    }
}

/// Persisted intent for one worker; the orchestrator reconciles toward it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredStateRecord {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Operator-facing failure category of the last failed transition
    #[serde(default)]
    pub last_error: Option<String>,
    pub spec: WorkerSpec,
}

impl DesiredStateRecord {
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            worker_id: spec.id,
            status: WorkerStatus::Stopped,
            port: None,
            pid: None,
            started_at: None,
            stopped_at: None,
            last_error: None,
            spec,
        }
    }

    pub fn mark_starting(&mut self) {
        self.status = WorkerStatus::Starting;
        self.last_error = None;
    }

    pub fn mark_running(&mut self, port: u16, pid: Option<u32>, at: DateTime<Utc>) {
        self.status = WorkerStatus::Running;
        self.port = Some(port);
        self.pid = pid;
        self.started_at = Some(at);
        self.last_error = None;
    }

    pub fn mark_stopping(&mut self) {
        self.status = WorkerStatus::Stopping;
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.status = WorkerStatus::Stopped;
        self.port = None;
        self.pid = None;
        self.stopped_at = Some(at);
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.status = WorkerStatus::Error;
        self.port = None;
        self.pid = None;
        self.last_error = Some(reason.into());
    }
}

/// Notification severity understood by the alerting pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId::Orchestrator.to_string(), "orchestrator");
        assert_eq!(ProcessId::Gateway.to_string(), "gateway");
        assert_eq!(ProcessId::Worker(7).to_string(), "worker_7");
    }

    #[test]
    fn test_worker_id_parse() {
        assert_eq!(" 42 ".parse::<WorkerId>().unwrap(), WorkerId(42));
        assert!("abc".parse::<WorkerId>().is_err());
    }

    #[test]
    fn test_record_transitions() {
        let mut record = DesiredStateRecord::new(WorkerSpec::new(3, "SampleStrategy"));
        assert_eq!(record.status, WorkerStatus::Stopped);

        record.mark_starting();
        record.mark_running(8084, Some(4242), Utc::now());
        assert_eq!(record.status, WorkerStatus::Running);
        assert_eq!(record.port, Some(8084));

        record.mark_stopped(Utc::now());
        assert_eq!(record.status, WorkerStatus::Stopped);
        assert!(record.port.is_none());
        assert!(record.pid.is_none());
        assert!(record.stopped_at.is_some());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&WorkerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}

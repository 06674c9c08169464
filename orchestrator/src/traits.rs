//! Trait definitions with mockall annotations for testing
//!
//! Every collaborator the fleet manager talks to sits behind one of these
//! traits so the lifecycle, monitor and recovery logic can be exercised
//! with mocks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use shared::{DesiredStateRecord, RouteTable, Severity, WorkerId, WorkerSpec, WorkerStatus};

use crate::core::heartbeat::{HeartbeatPolicy, HeartbeatRecord, RestartRecord};
use crate::error::OrchestratorResult;
use crate::types::WorkerOutcome;

/// Alert handed to the notification pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Exchange credentials embedded in a worker configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// Point-in-time OS resource usage of a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub threads: usize,
}

/// Persistence collaborator for desired state and history tables
#[mockall::automock]
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get_record(&self, worker_id: WorkerId) -> OrchestratorResult<Option<DesiredStateRecord>>;

    /// All records currently in `status`
    async fn records_with_status(&self, status: WorkerStatus) -> OrchestratorResult<Vec<DesiredStateRecord>>;

    async fn upsert_record(&self, record: &DesiredStateRecord) -> OrchestratorResult<()>;

    async fn load_policy(&self, worker_id: WorkerId) -> OrchestratorResult<Option<HeartbeatPolicy>>;

    async fn save_policy(&self, policy: &HeartbeatPolicy) -> OrchestratorResult<()>;

    async fn append_heartbeat(&self, record: &HeartbeatRecord) -> OrchestratorResult<()>;

    async fn append_restart(&self, record: &RestartRecord) -> OrchestratorResult<()>;

    /// Most recent heartbeat rows for a worker, newest first
    async fn heartbeat_history(&self, worker_id: WorkerId, limit: usize) -> OrchestratorResult<Vec<HeartbeatRecord>>;

    /// Most recent restart rows for a worker, newest first
    async fn restart_history(&self, worker_id: WorkerId, limit: usize) -> OrchestratorResult<Vec<RestartRecord>>;
}

/// Fire-and-forget notification sink
///
/// Implementations must not block the caller on delivery and must not
/// surface delivery failures.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Resolves the outbound proxy attached to a worker, if any
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProxyResolver: Send + Sync {
    /// `Ok(None)` means a direct connection
    async fn resolve(&self, proxy_id: Option<u32>) -> OrchestratorResult<Option<String>>;
}

/// Exchange credential source
#[mockall::automock]
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Credentials for `exchange`; missing credentials are only an error for live workers
    async fn credentials(&self, exchange: &str, dry_run: bool) -> OrchestratorResult<Credentials>;
}

/// HTTP control surface of a running worker
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerProbe: Send + Sync {
    /// Readiness check; `true` only on HTTP 200
    async fn ping(&self, port: u16) -> bool;

    /// Ask the worker to shut itself down
    async fn request_stop(&self, port: u16) -> bool;
}

/// Makes the current routing table durable and visible to the gateway
#[mockall::automock]
#[async_trait::async_trait]
pub trait RoutePublisher: Send + Sync {
    async fn publish(&self, table: &RouteTable) -> OrchestratorResult<()>;
}

/// OS-level view of arbitrary processes by pid
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessInspector: Send + Sync {
    /// `None` when the process is gone or cannot be inspected
    fn snapshot(&self, pid: u32) -> Option<ResourceSnapshot>;

    /// Take the CPU baseline of a newly started process
    fn prime(&self, pid: u32);

    /// Full command line of a live process
    fn command_line(&self, pid: u32) -> Option<String>;

    /// SIGTERM, wait up to `grace`, then SIGKILL; `true` if the pid is gone afterwards
    async fn terminate(&self, pid: u32, grace: Duration) -> bool;
}

/// What the heartbeat monitor needs from the fleet
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerControl: Send + Sync {
    /// Stop then start the worker; returns the new pid
    async fn restart_worker(&self, worker_id: WorkerId) -> OrchestratorResult<Option<u32>>;

    /// Whether an operator stop is currently in progress
    fn is_stopping(&self, worker_id: WorkerId) -> bool;
}

/// Full start path (record transitions and monitoring) used by recovery
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: WorkerSpec) -> WorkerOutcome;
}

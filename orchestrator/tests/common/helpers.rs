//! Test helpers and builder patterns for orchestrator tests
//!
//! Builders wire real components (the JSON state store, the worker manager)
//! to mocked collaborators so each suite only states what differs.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use orchestrator::config::FleetSettings;
use orchestrator::core::HeartbeatMonitor;
use orchestrator::services::{JsonStateStore, SystemProcessInspector};
use orchestrator::traits::{MockNotifier, MockWorkerControl, MockWorkerProbe, Notification, WorkerControl};
use orchestrator::{HealthStatus, HeartbeatPolicy, Orchestrator, WorkerManager};
use shared::{format_heartbeat_line, WorkerId};

use super::fixtures::TestFixtures;

pub type Notifications = Arc<Mutex<Vec<Notification>>>;

/// Builder for a heartbeat monitor over a temporary state directory
pub struct MonitorBuilder {
    policy: HeartbeatPolicy,
    control: Arc<dyn WorkerControl>,
}

/// A built monitor together with everything the test inspects afterwards
pub struct MonitorHarness {
    pub monitor: HeartbeatMonitor,
    pub store: Arc<JsonStateStore>,
    pub notifications: Notifications,
    pub dir: TempDir,
}

impl MonitorBuilder {
    /// Create a builder whose control never reports a stop in progress and never restarts
    pub fn new() -> Self {
        let mut control = MockWorkerControl::new();
        control.expect_is_stopping().returning(|_| false);

        Self {
            policy: TestFixtures::policy(),
            control: Arc::new(control),
        }
    }

    /// Configure the default heartbeat policy (fluent API)
    pub fn with_policy(mut self, policy: HeartbeatPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the worker control entirely (fluent API)
    pub fn with_control(mut self, control: impl WorkerControl + 'static) -> Self {
        self.control = Arc::new(control);
        self
    }

    pub fn build(self) -> MonitorHarness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStateStore::new(dir.path().join("state")));
        let (notifier, notifications) = TestHelpers::recording_notifier();

        let monitor = HeartbeatMonitor::new(store.clone(), notifier, self.control, self.policy)
            .with_recipient("ops");

        MonitorHarness {
            monitor,
            store,
            notifications,
            dir,
        }
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorHarness {
    pub fn log_path(&self, worker_id: WorkerId) -> PathBuf {
        self.dir.path().join(format!("worker_{worker_id}.log"))
    }

    pub fn titles(&self) -> Vec<String> {
        TestHelpers::titles(&self.notifications)
    }
}

/// Builder for a full orchestrator running `sleep` processes as workers
pub struct OrchestratorBuilder {
    base_port: u16,
    max_workers: usize,
    probe_ready: bool,
    auto_recover: bool,
    recovery_retries: u32,
}

pub struct FleetHarness {
    pub orchestrator: Orchestrator<MockWorkerProbe>,
    pub store: Arc<JsonStateStore>,
    pub notifications: Notifications,
    pub dir: TempDir,
}

impl OrchestratorBuilder {
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            max_workers: 10,
            probe_ready: true,
            auto_recover: true,
            recovery_retries: 2,
        }
    }

    /// Configure the worker ceiling (fluent API)
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Configure whether workers ever answer their readiness probe (fluent API)
    pub fn with_ready_workers(mut self, ready: bool) -> Self {
        self.probe_ready = ready;
        self
    }

    /// Configure startup recovery (fluent API)
    pub fn with_auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    pub fn settings(&self, data_dir: &Path) -> FleetSettings {
        FleetSettings {
            base_port: self.base_port,
            max_port: self.base_port + 49,
            max_workers: self.max_workers,
            data_dir: data_dir.to_path_buf(),
            worker_command: TestFixtures::WORKER_COMMAND.to_string(),
            startup_timeout: TestFixtures::startup_timeout(),
            readiness_poll_interval: Duration::from_millis(20),
            stop_grace: Duration::from_secs(3),
            graceful_stop_timeout: Duration::from_secs(1),
            auto_recover: self.auto_recover,
            recovery_retries: self.recovery_retries,
            recovery_delay: Duration::from_millis(10),
            heartbeat_defaults: TestFixtures::policy(),
            ..FleetSettings::default()
        }
    }

    pub fn build(self) -> FleetHarness {
        let dir = TempDir::new().unwrap();
        let settings = self.settings(dir.path());

        let ready = self.probe_ready;
        let mut probe = MockWorkerProbe::new();
        probe.expect_ping().returning(move |_| ready);
        probe.expect_request_stop().returning(|_| false);

        let store = Arc::new(JsonStateStore::new(settings.state_dir()));
        let (notifier, notifications) = TestHelpers::recording_notifier();
        let manager = WorkerManager::new(settings, Arc::new(probe));

        let orchestrator = Orchestrator::new(manager, store.clone(), notifier, Arc::new(SystemProcessInspector::new()));

        FleetHarness {
            orchestrator,
            store,
            notifications,
            dir,
        }
    }
}

/// Helper functions for common test scenarios
pub struct TestHelpers;

impl TestHelpers {
    /// Notifier mock that keeps every notification it receives
    pub fn recording_notifier() -> (Arc<MockNotifier>, Notifications) {
        let notifications: Notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notifications);

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(move |n| sink.lock().unwrap().push(n))
            .times(0..);

        (Arc::new(notifier), notifications)
    }

    pub fn titles(notifications: &Notifications) -> Vec<String> {
        notifications.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }

    /// Append one heartbeat line to a worker log
    pub fn write_heartbeat(path: &Path, time: DateTime<Utc>, pid: u32) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{}", format_heartbeat_line(time, pid, "2024.1", "RUNNING")).unwrap();
    }

    /// Poll worker health until it reports `expected` or two seconds pass
    pub async fn wait_for_health(
        orchestrator: &Orchestrator<MockWorkerProbe>,
        worker_id: WorkerId,
        expected: HealthStatus,
    ) -> HealthStatus {
        let mut status = orchestrator.health(worker_id).await.status;
        for _ in 0..40 {
            if status == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            status = orchestrator.health(worker_id).await.status;
        }
        status
    }
}

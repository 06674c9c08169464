//! Heartbeat monitor
//!
//! Each registered worker gets its own checking task, so a slow log read or
//! restart for one worker never delays the checks of another. A check is a
//! point-in-time read of whatever the worker appended since the last check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use shared::{process_debug, process_error, process_info, process_warn, ProcessId, Severity, WorkerId};

use crate::core::heartbeat::{HeartbeatPolicy, HeartbeatRecord, HeartbeatState, LogTail, RestartRecord};
use crate::error::OrchestratorResult;
use crate::traits::{Notification, Notifier, StateStore, WorkerControl};

/// Restart reason written to the restart history
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat_timeout";

/// What a single check concluded
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    NotMonitored,
    Disabled,
    Normal { staleness_secs: i64 },
    Recovered { staleness_secs: i64 },
    Abnormal { staleness_secs: i64, restart: RestartDecision },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestartDecision {
    NotAuthorized,
    SkippedStopping,
    SkippedInProgress,
    SkippedCooldown,
    SkippedMaxAttempts,
    Restarted { new_pid: Option<u32> },
    Failed { error: String },
}

/// Display snapshot of one monitored worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub worker_id: WorkerId,
    pub enabled: bool,
    pub is_abnormal: bool,
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    pub last_pid: Option<u32>,
    pub last_version: Option<String>,
    pub last_state: Option<String>,
    pub time_since_last_heartbeat_seconds: Option<i64>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
    pub timeout_secs: u64,
    pub auto_restart: bool,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub total: usize,
    pub healthy: usize,
    pub abnormal: usize,
}

struct MonitoredWorker {
    policy: HeartbeatPolicy,
    state: HeartbeatState,
    tail: LogTail,
    /// A restart is running with the lock released
    restarting: bool,
}

struct MonitorInner {
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    control: Arc<dyn WorkerControl>,
    defaults: HeartbeatPolicy,
    recipient: String,
    workers: RwLock<HashMap<WorkerId, Arc<Mutex<MonitoredWorker>>>>,
}

pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
    tasks: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        control: Arc<dyn WorkerControl>,
        defaults: HeartbeatPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                store,
                notifier,
                control,
                defaults,
                recipient: "admin".to_string(),
                workers: RwLock::new(HashMap::new()),
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Configure notification recipient (fluent API)
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.recipient = recipient.into();
        }
        self
    }

    /// Start monitoring a worker's log, replacing any previous registration
    pub async fn register(
        &self,
        worker_id: WorkerId,
        log_path: PathBuf,
        timeout_secs: Option<u64>,
        auto_restart: Option<bool>,
    ) -> OrchestratorResult<HeartbeatPolicy> {
        self.unregister(worker_id).await;

        let mut policy = match self.inner.store.load_policy(worker_id).await? {
            Some(policy) => policy,
            None => HeartbeatPolicy::for_worker(worker_id, &self.inner.defaults),
        };
        if let Some(timeout) = timeout_secs {
            policy.timeout_secs = timeout;
        }
        if let Some(auto_restart) = auto_restart {
            policy.auto_restart = auto_restart;
        }
        self.inner.store.save_policy(&policy).await?;

        let worker = MonitoredWorker {
            policy: policy.clone(),
            state: HeartbeatState::new(Utc::now()),
            tail: LogTail::new(log_path),
            restarting: false,
        };
        self.inner
            .workers
            .write()
            .await
            .insert(worker_id, Arc::new(Mutex::new(worker)));

        if policy.enabled {
            let task = self.spawn_checker(worker_id, &policy);
            self.tasks.lock().await.insert(worker_id, task);
            process_info!(
                ProcessId::current(),
                "💓 Monitoring heartbeat of worker {} (timeout {}s, every {}s, auto_restart={})",
                worker_id,
                policy.timeout_secs,
                policy.check_interval_secs,
                policy.auto_restart
            );
        } else {
            process_debug!(
                ProcessId::current(),
                "Heartbeat monitoring disabled for worker {}",
                worker_id
            );
        }

        Ok(policy)
    }

    /// Stop checking a worker and drop its in-memory state
    ///
    /// Waits for an in-flight check (including a pending restart) to be cancelled.
    pub async fn unregister(&self, worker_id: WorkerId) -> bool {
        let task = self.tasks.lock().await.remove(&worker_id);
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.inner.workers.write().await.remove(&worker_id).is_some()
    }

    pub async fn is_registered(&self, worker_id: WorkerId) -> bool {
        self.inner.workers.read().await.contains_key(&worker_id)
    }

    /// Run one check now, as the periodic task would
    pub async fn check_now(&self, worker_id: WorkerId) -> OrchestratorResult<CheckOutcome> {
        self.inner.check_at(worker_id, Utc::now()).await
    }

    /// Run one check as of `now`
    pub async fn check_at(&self, worker_id: WorkerId, now: DateTime<Utc>) -> OrchestratorResult<CheckOutcome> {
        self.inner.check_at(worker_id, now).await
    }

    /// Change the persisted policy, and the live one if the worker is monitored
    pub async fn update_policy(
        &self,
        worker_id: WorkerId,
        timeout_secs: Option<u64>,
        auto_restart: Option<bool>,
    ) -> OrchestratorResult<HeartbeatPolicy> {
        let mut policy = match self.inner.store.load_policy(worker_id).await? {
            Some(policy) => policy,
            None => HeartbeatPolicy::for_worker(worker_id, &self.inner.defaults),
        };
        if let Some(timeout) = timeout_secs {
            policy.timeout_secs = timeout;
        }
        if let Some(auto_restart) = auto_restart {
            policy.auto_restart = auto_restart;
        }
        self.inner.store.save_policy(&policy).await?;

        if let Some(entry) = self.inner.entry(worker_id).await {
            let mut worker = entry.lock().await;
            worker.policy.timeout_secs = policy.timeout_secs;
            worker.policy.auto_restart = policy.auto_restart;
        }

        Ok(policy)
    }

    pub async fn status(&self, worker_id: WorkerId) -> Option<HeartbeatStatus> {
        let entry = self.inner.entry(worker_id).await?;
        let worker = entry.lock().await;
        Some(Self::snapshot(worker_id, &worker, Utc::now()))
    }

    pub async fn all_statuses(&self) -> Vec<HeartbeatStatus> {
        let entries: Vec<(WorkerId, Arc<Mutex<MonitoredWorker>>)> = self
            .inner
            .workers
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let now = Utc::now();
        let mut statuses = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let worker = entry.lock().await;
            statuses.push(Self::snapshot(id, &worker, now));
        }
        statuses.sort_by_key(|s| s.worker_id);
        statuses
    }

    pub async fn summary(&self) -> MonitorSummary {
        let statuses = self.all_statuses().await;
        let abnormal = statuses.iter().filter(|s| s.is_abnormal).count();
        MonitorSummary {
            total: statuses.len(),
            healthy: statuses.len() - abnormal,
            abnormal,
        }
    }

    /// Abort every checking task
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.inner.workers.write().await.clear();
    }

    fn spawn_checker(&self, worker_id: WorkerId, policy: &HeartbeatPolicy) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let period = policy.check_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match inner.check_at(worker_id, Utc::now()).await {
                    Ok(CheckOutcome::NotMonitored) => break,
                    Ok(_) => {}
                    Err(e) => {
                        process_error!(
                            ProcessId::current(),
                            "❌ Heartbeat check for worker {} failed: {}",
                            worker_id,
                            e
                        );
                    }
                }
            }
        })
    }

    fn snapshot(worker_id: WorkerId, worker: &MonitoredWorker, now: DateTime<Utc>) -> HeartbeatStatus {
        let state = &worker.state;
        HeartbeatStatus {
            worker_id,
            enabled: worker.policy.enabled,
            is_abnormal: state.is_abnormal,
            last_heartbeat_time: state.last_heartbeat_time,
            last_pid: state.last_pid,
            last_version: state.last_version.clone(),
            last_state: state.last_state.clone(),
            time_since_last_heartbeat_seconds: state.last_heartbeat_time.map(|t| (now - t).num_seconds()),
            consecutive_failures: state.consecutive_failures,
            restart_count: state.restart_count,
            last_restart_time: state.last_restart_time,
            timeout_secs: worker.policy.timeout_secs,
            auto_restart: worker.policy.auto_restart,
            log_path: worker.tail.path().to_path_buf(),
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.try_lock() {
            for task in tasks.values() {
                task.abort();
            }
        }
    }
}

impl MonitorInner {
    async fn entry(&self, worker_id: WorkerId) -> Option<Arc<Mutex<MonitoredWorker>>> {
        self.workers.read().await.get(&worker_id).cloned()
    }

    async fn check_at(&self, worker_id: WorkerId, now: DateTime<Utc>) -> OrchestratorResult<CheckOutcome> {
        let Some(entry) = self.entry(worker_id).await else {
            return Ok(CheckOutcome::NotMonitored);
        };
        let mut worker = entry.lock().await;

        if !worker.policy.enabled {
            return Ok(CheckOutcome::Disabled);
        }

        match worker.tail.latest_heartbeat().await {
            Ok(Some(line)) => {
                if worker.state.observe(&line) {
                    let row = HeartbeatRecord {
                        worker_id,
                        heartbeat_time: Some(line.time),
                        pid: Some(line.pid),
                        version: Some(line.version.clone()),
                        state: Some(line.state.clone()),
                        is_timeout: false,
                        time_since_last_secs: Some((now - line.time).num_seconds()),
                        recorded_at: now,
                    };
                    self.persist_heartbeat(&row).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                process_warn!(
                    ProcessId::current(),
                    "⚠️ Could not read log {} of worker {}: {}",
                    worker.tail.path().display(),
                    worker_id,
                    e
                );
            }
        }

        let staleness_secs = worker.state.staleness(now).num_seconds();

        if !worker.state.is_timed_out(now, worker.policy.timeout()) {
            worker.state.consecutive_failures = 0;
            if worker.state.is_abnormal {
                worker.state.is_abnormal = false;
                process_info!(ProcessId::current(), "💚 Worker {} heartbeat recovered", worker_id);
                self.send(
                    worker_id,
                    "Heartbeat recovered",
                    format!("Worker {worker_id} is producing heartbeats again"),
                    Severity::Info,
                    staleness_secs,
                )
                .await;
                return Ok(CheckOutcome::Recovered { staleness_secs });
            }
            return Ok(CheckOutcome::Normal { staleness_secs });
        }

        worker.state.consecutive_failures += 1;
        worker.state.is_abnormal = true;

        let row = HeartbeatRecord {
            worker_id,
            heartbeat_time: worker.state.last_heartbeat_time,
            pid: worker.state.last_pid,
            version: worker.state.last_version.clone(),
            state: worker.state.last_state.clone(),
            is_timeout: true,
            time_since_last_secs: Some(staleness_secs),
            recorded_at: now,
        };
        self.persist_heartbeat(&row).await;

        process_warn!(
            ProcessId::current(),
            "💔 Worker {} heartbeat stale for {}s (timeout {}s, failure #{})",
            worker_id,
            staleness_secs,
            worker.policy.timeout_secs,
            worker.state.consecutive_failures
        );
        self.send(
            worker_id,
            "Heartbeat timeout",
            format!(
                "Worker {worker_id} has not produced a heartbeat for {staleness_secs}s (timeout {}s)",
                worker.policy.timeout_secs
            ),
            Severity::Critical,
            staleness_secs,
        )
        .await;

        let restart = if worker.policy.auto_restart {
            self.try_restart(worker_id, &entry, worker, now).await
        } else {
            RestartDecision::NotAuthorized
        };

        Ok(CheckOutcome::Abnormal { staleness_secs, restart })
    }

    /// Decide on and run a restart; the worker's lock is not held while it runs
    async fn try_restart(
        &self,
        worker_id: WorkerId,
        entry: &Mutex<MonitoredWorker>,
        mut worker: MutexGuard<'_, MonitoredWorker>,
        now: DateTime<Utc>,
    ) -> RestartDecision {
        if self.control.is_stopping(worker_id) {
            return RestartDecision::SkippedStopping;
        }

        if worker.restarting {
            return RestartDecision::SkippedInProgress;
        }

        if worker.state.restart_count >= worker.policy.max_restart_attempts {
            if !worker.state.max_attempts_alerted {
                worker.state.max_attempts_alerted = true;
                self.send(
                    worker_id,
                    "Max restart attempts reached",
                    format!(
                        "Worker {worker_id} was restarted {} times and still has no heartbeat; manual intervention required",
                        worker.state.restart_count
                    ),
                    Severity::Critical,
                    worker.state.staleness(now).num_seconds(),
                )
                .await;
            }
            return RestartDecision::SkippedMaxAttempts;
        }

        if worker.state.in_cooldown(now, worker.policy.cooldown()) {
            process_debug!(
                ProcessId::current(),
                "Worker {} restarted recently, skipping this cycle",
                worker_id
            );
            return RestartDecision::SkippedCooldown;
        }

        worker.state.restart_count += 1;
        worker.state.last_restart_time = Some(now);
        worker.restarting = true;
        let previous_pid = worker.state.last_pid;

        process_info!(
            ProcessId::current(),
            "🔄 Restarting worker {} (attempt {}/{})",
            worker_id,
            worker.state.restart_count,
            worker.policy.max_restart_attempts
        );
        drop(worker);

        let result = self.control.restart_worker(worker_id).await;

        let mut worker = entry.lock().await;
        worker.restarting = false;
        match result {
            Ok(new_pid) => {
                worker.state.reset_after_restart(now);
                self.persist_restart(&RestartRecord {
                    worker_id,
                    reason: HEARTBEAT_TIMEOUT_REASON.to_string(),
                    restart_time: now,
                    success: true,
                    error_message: None,
                    previous_pid,
                    new_pid,
                })
                .await;
                self.send(
                    worker_id,
                    "Worker restarted",
                    format!(
                        "Worker {worker_id} restarted after heartbeat timeout (pid {} -> {})",
                        display_pid(previous_pid),
                        display_pid(new_pid)
                    ),
                    Severity::Info,
                    0,
                )
                .await;
                RestartDecision::Restarted { new_pid }
            }
            Err(e) => {
                let error = e.to_string();
                self.persist_restart(&RestartRecord {
                    worker_id,
                    reason: HEARTBEAT_TIMEOUT_REASON.to_string(),
                    restart_time: now,
                    success: false,
                    error_message: Some(error.clone()),
                    previous_pid,
                    new_pid: None,
                })
                .await;
                self.send(
                    worker_id,
                    "Worker restart failed",
                    format!("Worker {worker_id} could not be restarted: {error}"),
                    Severity::Critical,
                    worker.state.staleness(now).num_seconds(),
                )
                .await;
                RestartDecision::Failed { error }
            }
        }
    }

    async fn persist_heartbeat(&self, row: &HeartbeatRecord) {
        if let Err(e) = self.store.append_heartbeat(row).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Failed to persist heartbeat row for worker {}: {}",
                row.worker_id,
                e
            );
        }
    }

    async fn persist_restart(&self, row: &RestartRecord) {
        if let Err(e) = self.store.append_restart(row).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Failed to persist restart row for worker {}: {}",
                row.worker_id,
                e
            );
        }
    }

    async fn send(&self, worker_id: WorkerId, title: &str, message: String, severity: Severity, staleness_secs: i64) {
        let mut metadata = HashMap::new();
        metadata.insert("worker_id".to_string(), serde_json::json!(worker_id));
        metadata.insert("staleness_secs".to_string(), serde_json::json!(staleness_secs));

        self.notifier
            .notify(Notification {
                recipient: self.recipient.clone(),
                title: title.to_string(),
                message,
                severity,
                metadata,
            })
            .await;
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
}

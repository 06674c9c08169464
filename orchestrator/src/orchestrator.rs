//! Fleet orchestrator
//!
//! The single object the binary builds at startup and hands to every
//! consumer. It owns the lifecycle manager, the heartbeat monitor and the
//! recovery coordinator, keeps the desired-state records in step with every
//! start and stop, and runs the periodic capacity and health sweeps.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use shared::{
    process_debug, process_error, process_warn, DesiredStateRecord, ProcessId, Severity, WorkerId,
    WorkerSpec,
};

use crate::config::FleetSettings;
use crate::core::monitor::{HeartbeatMonitor, HeartbeatStatus, MonitorSummary};
use crate::core::recovery::{RecoveryCoordinator, RecoveryReport};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::process_manager::WorkerManager;
use crate::traits::{
    Notification, Notifier, ProcessInspector, StateStore, WorkerControl, WorkerLauncher, WorkerProbe,
};
use crate::types::{CapacityInfo, HealthReport, HealthStatus, PortPoolStatus, WorkerOutcome};

/// Restart path handed to the heartbeat monitor
///
/// Keeps the desired-state record in step with the new process.
pub struct FleetRestarter<P: WorkerProbe + 'static> {
    manager: Arc<WorkerManager<P>>,
    store: Arc<dyn StateStore>,
}

impl<P: WorkerProbe + 'static> FleetRestarter<P> {
    pub fn new(manager: Arc<WorkerManager<P>>, store: Arc<dyn StateStore>) -> Self {
        Self { manager, store }
    }
}

#[async_trait::async_trait]
impl<P: WorkerProbe + 'static> WorkerControl for FleetRestarter<P> {
    async fn restart_worker(&self, worker_id: WorkerId) -> OrchestratorResult<Option<u32>> {
        let stored = self.store.get_record(worker_id).await?;
        let spec = match self.manager.spec(worker_id).await {
            Some(spec) => spec,
            None => stored
                .as_ref()
                .map(|record| record.spec.clone())
                .ok_or(OrchestratorError::NotRunning { worker_id })?,
        };
        let mut record = stored.unwrap_or_else(|| DesiredStateRecord::new(spec.clone()));

        match self.manager.restart(spec).await {
            Ok(info) => {
                record.mark_running(info.port, info.pid, info.started_at);
                self.store.upsert_record(&record).await?;
                Ok(info.pid)
            }
            Err(e) => {
                record.mark_error(e.failure_reason().to_string());
                if let Err(store_err) = self.store.upsert_record(&record).await {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Failed to record restart failure of worker {}: {}",
                        worker_id,
                        store_err
                    );
                }
                Err(e)
            }
        }
    }

    fn is_stopping(&self, worker_id: WorkerId) -> bool {
        self.manager.is_stopping(worker_id)
    }
}

/// Main orchestrator that owns the fleet
pub struct Orchestrator<P: WorkerProbe + 'static> {
    settings: FleetSettings,
    manager: Arc<WorkerManager<P>>,
    restarter: Arc<FleetRestarter<P>>,
    monitor: HeartbeatMonitor,
    recovery: RecoveryCoordinator,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,

    /// Shutdown signal
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<mpsc::Receiver<()>>,
}

impl<P: WorkerProbe + 'static> Orchestrator<P> {
    /// Create new orchestrator with injected dependencies
    pub fn new(
        manager: WorkerManager<P>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        let settings = manager.settings().clone();
        let manager = Arc::new(manager);
        let restarter = Arc::new(FleetRestarter::new(Arc::clone(&manager), Arc::clone(&store)));

        let control: Arc<dyn WorkerControl> = restarter.clone();
        let monitor = HeartbeatMonitor::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            control,
            settings.heartbeat_defaults.clone(),
        )
        .with_recipient(settings.notify_recipient.clone());

        let recovery = RecoveryCoordinator::new(Arc::clone(&store), inspector)
            .with_retry_delay(settings.recovery_delay)
            .with_orphan_grace(settings.stop_grace);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            settings,
            manager,
            restarter,
            monitor,
            recovery,
            store,
            notifier,
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
        }
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn manager(&self) -> &WorkerManager<P> {
        &self.manager
    }

    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    /// Start a worker, recording `starting` and then `running` or `error`
    pub async fn start_worker(&self, spec: WorkerSpec) -> WorkerOutcome {
        let worker_id = spec.id;
        let mut record = self.load_record(&spec).await;
        record.spec = spec.clone();
        record.mark_starting();
        self.save_record(&record).await;

        match self.manager.start(spec).await {
            Ok(info) => {
                record.mark_running(info.port, info.pid, info.started_at);
                self.save_record(&record).await;

                if let Err(e) = self.monitor.register(worker_id, info.log_path.clone(), None, None).await {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Worker {} running but heartbeat monitoring failed: {}",
                        worker_id,
                        e
                    );
                }
                WorkerOutcome::running(&info)
            }
            Err(e) => {
                let reason = e.failure_reason();
                process_error!(ProcessId::current(), "❌ Worker {} failed to start ({}): {}", worker_id, reason, e);
                record.mark_error(reason.to_string());
                self.save_record(&record).await;
                WorkerOutcome::failed(worker_id, reason)
            }
        }
    }

    /// Stop a worker, cancelling any pending heartbeat restart first
    pub async fn stop_worker(&self, worker_id: WorkerId) -> WorkerOutcome {
        self.monitor.unregister(worker_id).await;

        let mut record = match self.store.get_record(worker_id).await {
            Ok(record) => record,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Could not read record of worker {}: {}", worker_id, e);
                None
            }
        };
        if let Some(record) = record.as_mut() {
            record.mark_stopping();
            self.save_record(record).await;
        }

        match self.manager.stop(worker_id).await {
            Ok(()) => {
                if let Some(record) = record.as_mut() {
                    record.mark_stopped(Utc::now());
                    self.save_record(record).await;
                }
                WorkerOutcome::stopped(worker_id)
            }
            Err(e) => {
                let reason = e.failure_reason();
                process_error!(ProcessId::current(), "❌ Worker {} failed to stop: {}", worker_id, e);
                if let Some(record) = record.as_mut() {
                    record.mark_error(reason.to_string());
                    self.save_record(record).await;
                }
                WorkerOutcome::failed(worker_id, reason)
            }
        }
    }

    /// Operator restart: stop then start with the current spec, monitoring re-armed
    pub async fn restart_worker(&self, worker_id: WorkerId) -> WorkerOutcome {
        self.monitor.unregister(worker_id).await;

        match self.restarter.restart_worker(worker_id).await {
            Ok(_) => match self.manager.info(worker_id).await {
                Some(info) => {
                    if let Err(e) = self.monitor.register(worker_id, info.log_path.clone(), None, None).await {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Worker {} restarted but heartbeat monitoring failed: {}",
                            worker_id,
                            e
                        );
                    }
                    WorkerOutcome::running(&info)
                }
                None => WorkerOutcome::failed(
                    worker_id,
                    OrchestratorError::NotRunning { worker_id }.failure_reason(),
                ),
            },
            Err(e) => {
                process_error!(ProcessId::current(), "❌ Worker {} failed to restart: {}", worker_id, e);
                WorkerOutcome::failed(worker_id, e.failure_reason())
            }
        }
    }

    /// Bring the fleet back to its desired state after a control-plane restart
    ///
    /// With auto-recovery disabled every `running` record is reset to `stopped`.
    pub async fn recover(&self) -> OrchestratorResult<RecoveryReport> {
        if self.settings.auto_recover {
            return self.recovery.recover(self, self.settings.recovery_retries).await;
        }

        let reset = self.recovery.reset_all().await?;
        Ok(RecoveryReport {
            found: reset,
            reset,
            ..RecoveryReport::default()
        })
    }

    pub async fn reset_all(&self) -> OrchestratorResult<usize> {
        self.recovery.reset_all().await
    }

    pub async fn health(&self, worker_id: WorkerId) -> HealthReport {
        self.manager.check_health(worker_id).await
    }

    pub async fn capacity_info(&self) -> CapacityInfo {
        self.manager.capacity_info().await
    }

    pub async fn port_pool_status(&self) -> PortPoolStatus {
        self.manager.port_pool_status().await
    }

    pub async fn heartbeat_status(&self, worker_id: WorkerId) -> Option<HeartbeatStatus> {
        self.monitor.status(worker_id).await
    }

    pub async fn heartbeat_summary(&self) -> MonitorSummary {
        self.monitor.summary().await
    }

    /// Main loop: periodic capacity watch and health sweep until shutdown
    pub async fn run(&self) -> OrchestratorResult<()> {
        let mut capacity_interval = interval(self.settings.capacity_check_interval);
        let mut health_interval = interval(self.settings.health_sweep_interval);
        capacity_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        health_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut shutdown_rx = self.shutdown_rx.lock().await;

        loop {
            tokio::select! {
                _ = capacity_interval.tick() => {
                    self.check_capacity().await;
                },

                _ = health_interval.tick() => {
                    self.sweep_health().await;
                },

                Some(_) = shutdown_rx.recv() => {
                    process_debug!(ProcessId::current(), "🛑 Shutting down orchestrator...");
                    self.shutdown().await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop monitoring, then stop every worker; desired state is left untouched
    /// so the next boot recovers the same fleet
    pub async fn shutdown(&self) {
        process_debug!(ProcessId::current(), "🛑 Starting graceful shutdown...");
        self.monitor.shutdown().await;
        self.manager.stop_all().await;
        process_debug!(ProcessId::current(), "✅ Orchestrator shutdown complete");
    }

    /// Get shutdown sender for external shutdown requests
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    async fn check_capacity(&self) {
        let capacity = self.manager.capacity_info().await;
        process_debug!(
            ProcessId::current(),
            "📊 Capacity: {}/{} workers ({}%)",
            capacity.running_workers,
            capacity.max_workers,
            capacity.utilization_percent
        );

        if capacity.utilization_percent < self.settings.capacity_alert_percent {
            return;
        }

        process_warn!(
            ProcessId::current(),
            "⚠️ Fleet utilization at {}% ({} of {} slots used)",
            capacity.utilization_percent,
            capacity.running_workers,
            capacity.max_workers
        );

        let mut metadata = HashMap::new();
        metadata.insert("running_workers".to_string(), serde_json::json!(capacity.running_workers));
        metadata.insert("max_workers".to_string(), serde_json::json!(capacity.max_workers));
        metadata.insert(
            "utilization_percent".to_string(),
            serde_json::json!(capacity.utilization_percent),
        );
        self.notifier
            .notify(Notification {
                recipient: self.settings.notify_recipient.clone(),
                title: "Fleet capacity warning".to_string(),
                message: format!(
                    "Fleet utilization is {}% ({} of {} workers)",
                    capacity.utilization_percent, capacity.running_workers, capacity.max_workers
                ),
                severity: Severity::Warning,
                metadata,
            })
            .await;
    }

    async fn sweep_health(&self) {
        for worker_id in self.manager.worker_ids().await {
            let report = self.manager.check_health(worker_id).await;
            match report.status {
                HealthStatus::Healthy => {}
                HealthStatus::ProcessDead => self.handle_dead_worker(&report).await,
                other => {
                    process_warn!(ProcessId::current(), "⚠️ Worker {} health: {:?}", worker_id, other);
                }
            }
        }
    }

    async fn handle_dead_worker(&self, report: &HealthReport) {
        let worker_id = report.worker_id;
        process_error!(
            ProcessId::current(),
            "💀 Worker {} process died (exit code {:?})",
            worker_id,
            report.exit_code
        );

        self.manager.discard_dead(worker_id).await;

        if let Ok(Some(mut record)) = self.store.get_record(worker_id).await {
            record.mark_error(OrchestratorError::ProcessCrashed {
                worker_id,
                exit_code: report.exit_code,
            }
            .failure_reason()
            .to_string());
            self.save_record(&record).await;
        }

        let mut metadata = HashMap::new();
        metadata.insert("worker_id".to_string(), serde_json::json!(worker_id));
        metadata.insert("exit_code".to_string(), serde_json::json!(report.exit_code));
        self.notifier
            .notify(Notification {
                recipient: self.settings.notify_recipient.clone(),
                title: format!("Worker {worker_id} process died"),
                message: format!("Worker {} exited unexpectedly (code {:?})", worker_id, report.exit_code),
                severity: Severity::Critical,
                metadata,
            })
            .await;
    }

    async fn load_record(&self, spec: &WorkerSpec) -> DesiredStateRecord {
        match self.store.get_record(spec.id).await {
            Ok(Some(record)) => record,
            Ok(None) => DesiredStateRecord::new(spec.clone()),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Could not read record of worker {}: {}", spec.id, e);
                DesiredStateRecord::new(spec.clone())
            }
        }
    }

    async fn save_record(&self, record: &DesiredStateRecord) {
        if let Err(e) = self.store.upsert_record(record).await {
            process_error!(
                ProcessId::current(),
                "⚠️ Failed to persist state of worker {}: {}",
                record.worker_id,
                e
            );
        }
    }
}

#[async_trait::async_trait]
impl<P: WorkerProbe + 'static> WorkerLauncher for Orchestrator<P> {
    async fn launch(&self, spec: WorkerSpec) -> WorkerOutcome {
        self.start_worker(spec).await
    }
}

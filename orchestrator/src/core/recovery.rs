//! Startup recovery
//!
//! Runs once before the control plane accepts traffic. Every record that
//! still claims `running` is either brought back through the normal start
//! path or forced to `stopped`; no record is left claiming a worker that
//! does not exist.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use shared::{process_info, process_warn, DesiredStateRecord, ProcessId, WorkerId, WorkerStatus};

use crate::config::config_file_name;
use crate::error::{FailureReason, OrchestratorError, OrchestratorResult};
use crate::traits::{ProcessInspector, StateStore, WorkerLauncher};

/// Per-worker outcome for operator visibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDetail {
    pub worker_id: WorkerId,
    pub recovered: bool,
    pub attempts: u32,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub orphan_terminated: Option<u32>,
    pub reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub found: usize,
    pub recovered: usize,
    pub reset: usize,
    pub details: Vec<RecoveryDetail>,
}

pub struct RecoveryCoordinator {
    store: Arc<dyn StateStore>,
    inspector: Arc<dyn ProcessInspector>,
    retry_delay: Duration,
    orphan_grace: Duration,
}

impl RecoveryCoordinator {
    pub fn new(store: Arc<dyn StateStore>, inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            store,
            inspector,
            retry_delay: Duration::from_secs(2),
            orphan_grace: Duration::from_secs(10),
        }
    }

    /// Configure delay between attempts (fluent API)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Configure how long an orphan gets between SIGTERM and SIGKILL (fluent API)
    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    /// Resurrect every worker whose desired state is `running`
    pub async fn recover(&self, launcher: &dyn WorkerLauncher, max_retries: u32) -> OrchestratorResult<RecoveryReport> {
        let records = self.store.records_with_status(WorkerStatus::Running).await?;
        let mut report = RecoveryReport {
            found: records.len(),
            ..RecoveryReport::default()
        };

        if records.is_empty() {
            process_info!(ProcessId::current(), "No workers to recover");
            return Ok(report);
        }

        process_info!(
            ProcessId::current(),
            "🔁 Recovering {} worker(s) marked running",
            records.len()
        );

        for record in records {
            let detail = self.recover_one(launcher, record, max_retries.max(1)).await?;
            if detail.recovered {
                report.recovered += 1;
            } else {
                report.reset += 1;
            }
            report.details.push(detail);
        }

        process_info!(
            ProcessId::current(),
            "Recovery finished: {} found, {} recovered, {} reset",
            report.found,
            report.recovered,
            report.reset
        );
        Ok(report)
    }

    /// Mark every `running` record as `stopped` without starting anything
    pub async fn reset_all(&self) -> OrchestratorResult<usize> {
        let records = self.store.records_with_status(WorkerStatus::Running).await?;
        let count = records.len();
        for mut record in records {
            record.mark_stopped(Utc::now());
            self.store.upsert_record(&record).await?;
        }
        if count > 0 {
            process_info!(ProcessId::current(), "Reset {} running record(s) to stopped", count);
        }
        Ok(count)
    }

    async fn recover_one(
        &self,
        launcher: &dyn WorkerLauncher,
        record: DesiredStateRecord,
        max_retries: u32,
    ) -> OrchestratorResult<RecoveryDetail> {
        let worker_id = record.worker_id;
        let orphan_terminated = match record.pid {
            Some(pid) => self.terminate_orphan(worker_id, pid).await,
            None => None,
        };

        let mut last_reason = None;
        for attempt in 1..=max_retries {
            let outcome = launcher.launch(record.spec.clone()).await;
            if outcome.is_running() {
                process_info!(
                    ProcessId::current(),
                    "✅ Recovered worker {} on port {:?} (attempt {})",
                    worker_id,
                    outcome.port,
                    attempt
                );
                return Ok(RecoveryDetail {
                    worker_id,
                    recovered: true,
                    attempts: attempt,
                    port: outcome.port,
                    pid: outcome.pid,
                    orphan_terminated,
                    reason: None,
                });
            }

            process_warn!(
                ProcessId::current(),
                "⚠️ Recovery attempt {}/{} for worker {} failed: {}",
                attempt,
                max_retries,
                worker_id,
                outcome
                    .reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown".to_string())
            );
            last_reason = outcome.reason;

            if attempt < max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let exhausted = OrchestratorError::RecoveryExhausted {
            worker_id,
            attempts: max_retries,
        };
        process_warn!(ProcessId::current(), "🛑 {}; marking stopped", exhausted);

        // The launcher may have left the record in `error`; the honest state is `stopped`
        let mut latest = self.store.get_record(worker_id).await?.unwrap_or(record);
        latest.mark_stopped(Utc::now());
        latest.last_error = last_reason.as_ref().map(ToString::to_string);
        self.store.upsert_record(&latest).await?;

        Ok(RecoveryDetail {
            worker_id,
            recovered: false,
            attempts: max_retries,
            port: None,
            pid: None,
            orphan_terminated,
            reason: last_reason,
        })
    }

    /// Kill a process left behind by a previous control plane
    ///
    /// Only a live pid whose command line names this worker's config file
    /// counts; anything else is a reused pid and is left alone.
    async fn terminate_orphan(&self, worker_id: WorkerId, pid: u32) -> Option<u32> {
        let command_line = self.inspector.command_line(pid)?;
        if !command_line.contains(&config_file_name(worker_id)) {
            return None;
        }

        process_warn!(
            ProcessId::current(),
            "🧟 Terminating orphaned process {} of worker {}",
            pid,
            worker_id
        );
        if self.inspector.terminate(pid, self.orphan_grace).await {
            Some(pid)
        } else {
            process_warn!(
                ProcessId::current(),
                "⚠️ Orphaned process {} of worker {} survived termination",
                pid,
                worker_id
            );
            None
        }
    }
}

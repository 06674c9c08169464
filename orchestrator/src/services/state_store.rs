//! JSON-file state store
//!
//! Desired-state records and heartbeat policies live in small JSON documents
//! rewritten atomically (temp file + rename); the two history tables are
//! append-only JSON Lines files.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use shared::{process_warn, DesiredStateRecord, ProcessId, SharedError, WorkerId, WorkerStatus};

use crate::core::heartbeat::{HeartbeatPolicy, HeartbeatRecord, RestartRecord};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::StateStore;

const WORKERS_FILE: &str = "workers.json";
const POLICIES_FILE: &str = "heartbeat_policies.json";
const HEARTBEAT_HISTORY_FILE: &str = "heartbeat_history.jsonl";
const RESTART_HISTORY_FILE: &str = "restart_history.jsonl";

pub struct JsonStateStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles on the JSON documents
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read_map<T: DeserializeOwned>(&self, file: &str) -> OrchestratorResult<BTreeMap<WorkerId, T>> {
        let path = self.path(file);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(SharedError::io(&path, e).into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            SharedError::DeserializationError {
                path,
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn write_map<T: Serialize>(&self, file: &str, map: &BTreeMap<WorkerId, T>) -> OrchestratorResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SharedError::io(&self.dir, e))?;

        let path = self.path(file);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(map)?;
        fs::write(&tmp, body).await.map_err(|e| SharedError::io(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| SharedError::io(&path, e))?;
        Ok(())
    }

    async fn append_line<T: Serialize>(&self, file: &str, row: &T) -> OrchestratorResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SharedError::io(&self.dir, e))?;

        let path = self.path(file);
        let mut line = serde_json::to_string(row)?;
        line.push('\n');

        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SharedError::io(&path, e))?;
        handle
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SharedError::io(&path, e))?;
        Ok(())
    }

    /// Newest-first rows of `worker_id`; unreadable lines are skipped
    async fn tail_rows<T, F>(&self, file: &str, limit: usize, belongs: F) -> OrchestratorResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let path = self.path(file);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SharedError::io(&path, e).into()),
        };

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines().rev() {
            if rows.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(row) if belongs(&row) => rows.push(row),
                Ok(_) => {}
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            process_warn!(
                ProcessId::current(),
                "⚠️ Skipped {} unreadable row(s) in {}",
                skipped,
                path.display()
            );
        }
        Ok(rows)
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn get_record(&self, worker_id: WorkerId) -> OrchestratorResult<Option<DesiredStateRecord>> {
        let mut records = self.read_map::<DesiredStateRecord>(WORKERS_FILE).await?;
        Ok(records.remove(&worker_id))
    }

    async fn records_with_status(&self, status: WorkerStatus) -> OrchestratorResult<Vec<DesiredStateRecord>> {
        let records = self.read_map::<DesiredStateRecord>(WORKERS_FILE).await?;
        Ok(records.into_values().filter(|r| r.status == status).collect())
    }

    async fn upsert_record(&self, record: &DesiredStateRecord) -> OrchestratorResult<()> {
        if record.worker_id != record.spec.id {
            return Err(OrchestratorError::store(format!(
                "record for worker {} carries spec of worker {}",
                record.worker_id, record.spec.id
            )));
        }
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_map::<DesiredStateRecord>(WORKERS_FILE).await?;
        records.insert(record.worker_id, record.clone());
        self.write_map(WORKERS_FILE, &records).await
    }

    async fn load_policy(&self, worker_id: WorkerId) -> OrchestratorResult<Option<HeartbeatPolicy>> {
        let mut policies = self.read_map::<HeartbeatPolicy>(POLICIES_FILE).await?;
        Ok(policies.remove(&worker_id))
    }

    async fn save_policy(&self, policy: &HeartbeatPolicy) -> OrchestratorResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut policies = self.read_map::<HeartbeatPolicy>(POLICIES_FILE).await?;
        policies.insert(policy.worker_id, policy.clone());
        self.write_map(POLICIES_FILE, &policies).await
    }

    async fn append_heartbeat(&self, record: &HeartbeatRecord) -> OrchestratorResult<()> {
        self.append_line(HEARTBEAT_HISTORY_FILE, record).await
    }

    async fn append_restart(&self, record: &RestartRecord) -> OrchestratorResult<()> {
        self.append_line(RESTART_HISTORY_FILE, record).await
    }

    async fn heartbeat_history(&self, worker_id: WorkerId, limit: usize) -> OrchestratorResult<Vec<HeartbeatRecord>> {
        self.tail_rows(HEARTBEAT_HISTORY_FILE, limit, |r: &HeartbeatRecord| r.worker_id == worker_id)
            .await
    }

    async fn restart_history(&self, worker_id: WorkerId, limit: usize) -> OrchestratorResult<Vec<RestartRecord>> {
        self.tail_rows(RESTART_HISTORY_FILE, limit, |r: &RestartRecord| r.worker_id == worker_id)
            .await
    }
}

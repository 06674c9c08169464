//! Durable routing table shared between the orchestrator and the gateway
//!
//! The orchestrator rebuilds the whole table whenever its running set
//! changes and writes it to disk; the gateway loads the same file on boot
//! and on every reload request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{SharedError, SharedResult};
use crate::types::WorkerId;

/// Host every worker API binds to
pub const WORKER_HOST: &str = "127.0.0.1";

/// Readiness path exposed by every worker
pub const PING_PATH: &str = "/api/v1/ping";

/// Where a single worker can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub upstream: String,
    pub health_check: String,
}

impl RouteEntry {
    pub fn for_port(port: u16) -> Self {
        let upstream = format!("http://{WORKER_HOST}:{port}");
        Self {
            health_check: format!("{upstream}{PING_PATH}"),
            upstream,
        }
    }

    /// Port encoded in the upstream URL, if it has one
    pub fn port(&self) -> Option<u16> {
        self.upstream
            .rsplit_once(':')
            .and_then(|(_, port)| port.trim_end_matches('/').parse().ok())
    }
}

/// Full routing table, keyed by worker id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    entries: BTreeMap<WorkerId, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(worker, port)` pairs
    pub fn from_ports<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = (WorkerId, u16)>,
    {
        let entries = ports
            .into_iter()
            .map(|(id, port)| (id, RouteEntry::for_port(port)))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, id: WorkerId, entry: RouteEntry) {
        self.entries.insert(id, entry);
    }

    pub fn get(&self, id: WorkerId) -> Option<&RouteEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkerId, &RouteEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the table from disk; a missing file is an empty table
    pub async fn load(path: &Path) -> SharedResult<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(SharedError::io(path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Self::new());
        }

        serde_json::from_str(&raw).map_err(|e| SharedError::DeserializationError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write the table next to `path` and rename it into place
    pub async fn save_atomic(&self, path: &Path) -> SharedResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SharedError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| SharedError::SerializationError {
            message: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SharedError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SharedError::io(path, e))
    }
}

//! Gateway state: the live routing table

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use shared::{RouteEntry, RouteTable, WorkerId};

#[derive(Debug)]
pub struct GatewayState {
    routes: RwLock<RouteTable>,
    reloads: AtomicU64,
    started_at: Instant,
}

impl GatewayState {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(RouteTable::new()),
            reloads: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn lookup(&self, worker_id: WorkerId) -> Option<RouteEntry> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_id)
            .cloned()
    }

    /// Snapshot of the whole table
    pub fn routes(&self) -> RouteTable {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap in a freshly loaded table; returns its size
    pub fn replace(&self, table: RouteTable) -> usize {
        let count = table.len();
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = table;
        self.reloads.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

//! Port pool and capacity accounting
//!
//! Hands out exactly one port per worker from a fixed inclusive range.
//! A worker prefers `base_port + worker_id` so the mapping stays stable and
//! debuggable; otherwise it gets the numerically smallest free port.

use std::collections::{BTreeSet, HashMap};

use shared::WorkerId;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::percent;

#[derive(Debug)]
pub struct PortPool {
    base_port: u16,
    max_port: u16,
    max_workers: usize,
    free: BTreeSet<u16>,
    allocated: HashMap<u16, WorkerId>,
}

/// Snapshot of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total_ports: usize,
    pub available: usize,
    pub allocated: usize,
}

impl PortPool {
    pub fn new(base_port: u16, max_port: u16, max_workers: usize) -> Self {
        let free: BTreeSet<u16> = (base_port..=max_port).collect();
        Self {
            base_port,
            max_port,
            max_workers,
            free,
            allocated: HashMap::new(),
        }
    }

    /// Reserve a port for `worker_id`
    pub fn allocate(&mut self, worker_id: WorkerId) -> OrchestratorResult<u16> {
        self.allocate_where(worker_id, |_| true)
    }

    /// Reserve the preferred port if `usable`, else the smallest free port that is
    ///
    /// Fails with `PortConflict` when free ports exist but none of them is usable.
    pub fn allocate_where(
        &mut self,
        worker_id: WorkerId,
        mut usable: impl FnMut(u16) -> bool,
    ) -> OrchestratorResult<u16> {
        if self.allocated.len() >= self.max_workers {
            return Err(OrchestratorError::CapacityExceeded {
                max_workers: self.max_workers,
            });
        }

        let preferred = u16::try_from(u32::from(self.base_port) + worker_id.as_u32())
            .ok()
            .filter(|p| self.free.contains(p));
        let first_choice = preferred
            .or_else(|| self.free.first().copied())
            .ok_or(OrchestratorError::CapacityExceeded {
                max_workers: self.max_workers,
            })?;

        let port = preferred
            .into_iter()
            .chain(self.free.iter().copied().filter(|p| Some(*p) != preferred))
            .find(|p| usable(*p))
            .ok_or(OrchestratorError::PortConflict { port: first_choice })?;

        self.free.remove(&port);
        self.allocated.insert(port, worker_id);
        Ok(port)
    }

    /// Return a port to the pool; releasing a free or foreign port is a no-op
    pub fn release(&mut self, port: u16) {
        if !self.in_range(port) {
            return;
        }
        self.allocated.remove(&port);
        self.free.insert(port);
    }

    pub fn in_range(&self, port: u16) -> bool {
        (self.base_port..=self.max_port).contains(&port)
    }

    pub fn is_free(&self, port: u16) -> bool {
        self.free.contains(&port)
    }

    pub fn owner(&self, port: u16) -> Option<WorkerId> {
        self.allocated.get(&port).copied()
    }

    pub fn counts(&self) -> PoolCounts {
        PoolCounts {
            total_ports: usize::from(self.max_port - self.base_port) + 1,
            available: self.free.len(),
            allocated: self.allocated.len(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn port_range(&self) -> (u16, u16) {
        (self.base_port, self.max_port)
    }

    pub fn utilization_percent(&self) -> f64 {
        let counts = self.counts();
        percent(counts.allocated, counts.total_ports)
    }
}

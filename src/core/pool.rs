//! # Worker pool - definitions and their live process records.
//!
//! A [`WorkerPool`] is owned by exactly one actor (the supervisor or the
//! scheduler) and is only touched from that actor's loop, so it needs no
//! locking.
//!
//! ## Rules
//! - A pid appears in at most one record
//! - A record always points at a registered definition
//! - `add_child` for an unknown definition fails and leaves the pool unchanged
//! - `delete_child` is idempotent

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::PoolError;
use crate::workers::{Definition, WorkerId};

/// Aggregate lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Starting,
    Running,
    Stopping,
    Shutdown,
}

/// Bookkeeping for one live child process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: u32,
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    /// Bytes, as last reported by a heartbeat.
    pub memory: u64,
    pub blocked: bool,
    pub detached: bool,
    pub last_heartbeat: Instant,
}

impl ProcessRecord {
    fn new(pid: u32, worker_id: WorkerId) -> Self {
        Self {
            pid,
            worker_id,
            started_at: Utc::now(),
            memory: 0,
            blocked: false,
            detached: false,
            last_heartbeat: Instant::now(),
        }
    }
}

/// Registered definitions plus the processes currently running for them.
pub struct WorkerPool<D> {
    definitions: BTreeMap<WorkerId, Arc<D>>,
    processes: HashMap<u32, ProcessRecord>,
}

impl<D> Default for WorkerPool<D> {
    fn default() -> Self {
        Self {
            definitions: BTreeMap::new(),
            processes: HashMap::new(),
        }
    }
}

impl<D: Definition> WorkerPool<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: D) -> Result<Arc<D>, PoolError> {
        let id = definition.id();
        if self.definitions.contains_key(&id) {
            return Err(PoolError::AlreadyRegistered { id });
        }
        let definition = Arc::new(definition);
        self.definitions.insert(id, definition.clone());
        Ok(definition)
    }

    pub fn definition(&self, id: WorkerId) -> Option<&Arc<D>> {
        self.definitions.get(&id)
    }

    /// Definitions in identity order.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<D>> {
        self.definitions.values()
    }

    /// Records a new live process for a registered definition.
    pub fn add_child(&mut self, id: WorkerId, pid: u32) -> Result<&mut ProcessRecord, PoolError> {
        if !self.definitions.contains_key(&id) {
            return Err(PoolError::DefinitionNotFound { id });
        }
        self.processes.insert(pid, ProcessRecord::new(pid, id));
        self.processes
            .get_mut(&pid)
            .ok_or(PoolError::DefinitionNotFound { id })
    }

    /// Removes and returns the record for `pid`, if any.
    pub fn delete_child(&mut self, pid: u32) -> Option<ProcessRecord> {
        self.processes.remove(&pid)
    }

    pub fn get_by_pid(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    pub fn get_by_pid_mut(&mut self, pid: u32) -> Option<&mut ProcessRecord> {
        self.processes.get_mut(&pid)
    }

    /// Live pids of one definition, ascending.
    pub fn alive_pids(&self, id: WorkerId) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .processes
            .values()
            .filter(|r| r.worker_id == id)
            .map(|r| r.pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    pub fn alive_count(&self, id: WorkerId) -> usize {
        self.processes.values().filter(|r| r.worker_id == id).count()
    }

    /// Every live pid, ascending.
    pub fn all_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.processes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.processes.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.processes.values_mut()
    }

    /// True when no process is alive.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }
}

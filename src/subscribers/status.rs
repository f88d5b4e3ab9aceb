//! # Server status snapshot maintained from lifecycle messages.
//!
//! ```text
//! Supervisor / Scheduler / children ──► LocalBus ──► StatusTracker::apply()
//!                                                          │
//!                                                          ▼
//!                                     Container["server_status"] = ServerStatus
//! ```
//!
//! ## Rules
//! - Only the master runs a tracker; clients read the snapshot through
//!   `ContainerGet`
//! - Every applied message republishes the whole snapshot
//! - Messages for unknown pids are ignored

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::PoolStatus;
use crate::messages::{Container, Message, MessageHandler, MessageKind, STATUS_KEY, SubscriptionId};
use crate::workers::{Definition, PeriodicWorkerDefinition, ProcessKind, WorkerDefinition, WorkerId};

/// A registered definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub name: String,
    pub kind: ProcessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Target process count of a long-running worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

/// A live child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub worker_id: WorkerId,
    pub name: String,
    pub kind: ProcessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Bytes, as last reported by a heartbeat.
    pub memory: u64,
    pub blocked: bool,
    pub detached: bool,
}

/// Snapshot published under [`STATUS_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub status: PoolStatus,
    pub workers: Vec<WorkerInfo>,
    pub processes: Vec<ProcessInfo>,
}

impl ServerStatus {
    /// Long-running worker definitions.
    pub fn workers(&self) -> impl Iterator<Item = &WorkerInfo> {
        self.workers.iter().filter(|w| w.kind == ProcessKind::Worker)
    }

    /// Periodic definitions with their last and next runs.
    pub fn periodic(&self) -> impl Iterator<Item = &WorkerInfo> {
        self.workers.iter().filter(|w| w.kind == ProcessKind::Periodic)
    }

    pub fn processes_of(&self, id: WorkerId) -> impl Iterator<Item = &ProcessInfo> {
        self.processes.iter().filter(move |p| p.worker_id == id)
    }
}

/// Keeps a [`ServerStatus`] current and mirrors it into a [`Container`].
pub struct StatusTracker {
    state: Mutex<ServerStatus>,
    container: Arc<Container>,
}

impl StatusTracker {
    pub fn new(name: impl Into<String>, container: Arc<Container>) -> Arc<Self> {
        let tracker = Arc::new(Self {
            state: Mutex::new(ServerStatus {
                name: name.into(),
                pid: std::process::id(),
                started_at: Utc::now(),
                status: PoolStatus::Starting,
                workers: Vec::new(),
                processes: Vec::new(),
            }),
            container,
        });
        tracker.publish();
        tracker
    }

    pub fn register_worker(&self, definition: &WorkerDefinition) {
        self.state.lock().workers.push(WorkerInfo {
            id: definition.id(),
            name: definition.name().to_string(),
            kind: ProcessKind::Worker,
            user: definition.credentials().user.clone(),
            count: Some(definition.count()),
            schedule: None,
            last_run: None,
            next_run: None,
        });
        self.publish();
    }

    pub fn register_periodic(&self, definition: &PeriodicWorkerDefinition) {
        self.state.lock().workers.push(WorkerInfo {
            id: definition.id(),
            name: definition.name().to_string(),
            kind: ProcessKind::Periodic,
            user: definition.credentials().user.clone(),
            count: None,
            schedule: Some(definition.schedule().to_string()),
            last_run: None,
            next_run: None,
        });
        self.publish();
    }

    pub fn set_status(&self, status: PoolStatus) {
        self.state.lock().status = status;
        self.publish();
    }

    pub fn snapshot(&self) -> ServerStatus {
        self.state.lock().clone()
    }

    /// Subscribes the tracker to every lifecycle message on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &dyn MessageHandler) -> Vec<SubscriptionId> {
        [
            MessageKind::ProcessSpawned,
            MessageKind::ProcessExited,
            MessageKind::Heartbeat,
            MessageKind::ProcessBlocked,
            MessageKind::ProcessDetached,
            MessageKind::PeriodicScheduled,
            MessageKind::PeriodicStarted,
        ]
        .into_iter()
        .map(|kind| {
            let tracker = self.clone();
            bus.subscribe(
                kind,
                Arc::new(move |m| {
                    if tracker.apply(m) {
                        tracker.publish();
                    }
                    Value::Null
                }),
            )
        })
        .collect()
    }

    /// Applies one message; returns whether the snapshot changed.
    pub fn apply(&self, message: &Message) -> bool {
        let mut state = self.state.lock();
        match message {
            Message::ProcessSpawned {
                worker_id,
                name,
                kind,
                pid,
                user,
                started_at,
            } => {
                state.processes.retain(|p| p.pid != *pid);
                state.processes.push(ProcessInfo {
                    pid: *pid,
                    worker_id: *worker_id,
                    name: name.clone(),
                    kind: *kind,
                    user: user.clone(),
                    started_at: *started_at,
                    memory: 0,
                    blocked: false,
                    detached: false,
                });
                state.processes.sort_by_key(|p| p.pid);
                true
            }
            Message::ProcessExited { pid, .. } => {
                let before = state.processes.len();
                state.processes.retain(|p| p.pid != *pid);
                state.processes.len() != before
            }
            Message::Heartbeat { pid, memory } => with_process(&mut state, *pid, |p| {
                p.memory = *memory;
                p.blocked = false;
            }),
            Message::ProcessBlocked { pid } => with_process(&mut state, *pid, |p| p.blocked = true),
            Message::ProcessDetached { pid } => with_process(&mut state, *pid, |p| {
                p.detached = true;
                p.blocked = false;
            }),
            Message::PeriodicScheduled {
                worker_id,
                next_run,
            } => with_worker(&mut state, *worker_id, |w| w.next_run = Some(*next_run)),
            Message::PeriodicStarted { worker_id, .. } => {
                with_worker(&mut state, *worker_id, |w| w.last_run = Some(Utc::now()))
            }
            _ => false,
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        match serde_json::to_value(&snapshot) {
            Ok(value) => self.container.set(STATUS_KEY, value),
            Err(e) => debug!(error = %e, "status snapshot not serializable"),
        }
    }
}

fn with_process(state: &mut ServerStatus, pid: u32, f: impl FnOnce(&mut ProcessInfo)) -> bool {
    match state.processes.iter_mut().find(|p| p.pid == pid) {
        Some(process) => {
            f(process);
            true
        }
        None => false,
    }
}

fn with_worker(state: &mut ServerStatus, id: WorkerId, f: impl FnOnce(&mut WorkerInfo)) -> bool {
    match state.workers.iter_mut().find(|w| w.id == id) {
        Some(worker) => {
            f(worker);
            true
        }
        None => false,
    }
}

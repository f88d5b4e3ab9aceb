//! # Message model shared by the master and its children.
//!
//! Every message is a closed variant of [`Message`], serialized as a JSON
//! object tagged by `type`. Handlers are registered per [`MessageKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workers::{ProcessKind, WorkerId};

/// Value returned from dispatch; `Value::Null` means "no result".
pub type Reply = Value;

/// Closed set of messages exchanged over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A child process was created and recorded in a pool.
    ProcessSpawned {
        worker_id: WorkerId,
        name: String,
        kind: ProcessKind,
        pid: u32,
        user: Option<String>,
        started_at: DateTime<Utc>,
    },
    /// A child process was reaped.
    ProcessExited {
        worker_id: WorkerId,
        kind: ProcessKind,
        pid: u32,
        exit_code: i32,
    },
    /// Liveness report sent by a worker every heartbeat period.
    Heartbeat { pid: u32, memory: u64 },
    /// The master stopped receiving heartbeats from a worker.
    ProcessBlocked { pid: u32 },
    /// A worker opted out of liveness tracking.
    ProcessDetached { pid: u32 },
    /// The scheduler computed the next run of a periodic job.
    PeriodicScheduled {
        worker_id: WorkerId,
        next_run: DateTime<Utc>,
    },
    /// The scheduler launched a periodic job.
    PeriodicStarted { worker_id: WorkerId, pid: u32 },
    /// Reads a value from the shared container.
    ContainerGet { key: String },
    /// Stores a value in the shared container.
    ContainerSet { key: String, value: Value },
    /// Checks whether the shared container holds a key.
    ContainerHas { key: String },
    /// Asks the master to shut down.
    StopServer,
    /// Asks the master to reload its workers.
    ReloadServer,
    /// Dispatches every contained message in order.
    Composite { messages: Vec<Message> },
}

/// Discriminant used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ProcessSpawned,
    ProcessExited,
    Heartbeat,
    ProcessBlocked,
    ProcessDetached,
    PeriodicScheduled,
    PeriodicStarted,
    ContainerGet,
    ContainerSet,
    ContainerHas,
    StopServer,
    ReloadServer,
    Composite,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ProcessSpawned { .. } => MessageKind::ProcessSpawned,
            Message::ProcessExited { .. } => MessageKind::ProcessExited,
            Message::Heartbeat { .. } => MessageKind::Heartbeat,
            Message::ProcessBlocked { .. } => MessageKind::ProcessBlocked,
            Message::ProcessDetached { .. } => MessageKind::ProcessDetached,
            Message::PeriodicScheduled { .. } => MessageKind::PeriodicScheduled,
            Message::PeriodicStarted { .. } => MessageKind::PeriodicStarted,
            Message::ContainerGet { .. } => MessageKind::ContainerGet,
            Message::ContainerSet { .. } => MessageKind::ContainerSet,
            Message::ContainerHas { .. } => MessageKind::ContainerHas,
            Message::StopServer => MessageKind::StopServer,
            Message::ReloadServer => MessageKind::ReloadServer,
            Message::Composite { .. } => MessageKind::Composite,
        }
    }

    /// Bundles messages into a single [`Message::Composite`].
    pub fn composite(messages: impl IntoIterator<Item = Message>) -> Self {
        Message::Composite {
            messages: messages.into_iter().collect(),
        }
    }

    pub fn container_get(key: impl Into<String>) -> Self {
        Message::ContainerGet { key: key.into() }
    }

    pub fn container_set(key: impl Into<String>, value: Value) -> Self {
        Message::ContainerSet {
            key: key.into(),
            value,
        }
    }

    pub fn container_has(key: impl Into<String>) -> Self {
        Message::ContainerHas { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_wire_shape() {
        let value = serde_json::to_value(Message::Heartbeat {
            pid: 42,
            memory: 1024,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "heartbeat", "pid": 42, "memory": 1024}));

        let stop = serde_json::to_value(Message::StopServer).unwrap();
        assert_eq!(stop, json!({"type": "stop_server"}));
    }

    #[test]
    fn composite_keeps_order() {
        let msg = Message::composite([Message::StopServer, Message::ReloadServer]);
        let Message::Composite { messages } = &msg else {
            panic!("expected composite");
        };
        assert_eq!(messages[0].kind(), MessageKind::StopServer);
        assert_eq!(messages[1].kind(), MessageKind::ReloadServer);
        assert_eq!(msg.kind(), MessageKind::Composite);
    }
}

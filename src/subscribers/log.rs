//! # Debug logging of bus traffic.
//!
//! [`LogWriter`] logs every lifecycle message the master sees. Enabled with
//! [`Config::log_events`](crate::Config::log_events).
//!
//! ## Output
//! ```text
//! [spawned] worker=web pid=4012 kind=worker
//! [exited] worker_id=1 pid=4012 code=100
//! [heartbeat] pid=4013 memory=5242880
//! [blocked] pid=4013
//! [detached] pid=4014
//! [scheduled] worker_id=2 next_run=2025-03-01T10:05:00Z
//! [periodic-started] worker_id=2 pid=4020
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::messages::{Message, MessageHandler, MessageKind, SubscriptionId};

/// Bus subscriber writing lifecycle messages to the `debug` log.
pub struct LogWriter;

impl LogWriter {
    pub fn attach(bus: &dyn MessageHandler) -> Vec<SubscriptionId> {
        [
            MessageKind::ProcessSpawned,
            MessageKind::ProcessExited,
            MessageKind::Heartbeat,
            MessageKind::ProcessBlocked,
            MessageKind::ProcessDetached,
            MessageKind::PeriodicScheduled,
            MessageKind::PeriodicStarted,
            MessageKind::StopServer,
            MessageKind::ReloadServer,
        ]
        .into_iter()
        .map(|kind| {
            bus.subscribe(
                kind,
                Arc::new(|m| {
                    LogWriter::write(m);
                    Value::Null
                }),
            )
        })
        .collect()
    }

    fn write(message: &Message) {
        match message {
            Message::ProcessSpawned {
                name, pid, kind, ..
            } => debug!("[spawned] worker={name} pid={pid} kind={}", kind.as_str()),
            Message::ProcessExited {
                worker_id,
                pid,
                exit_code,
                ..
            } => debug!("[exited] worker_id={worker_id} pid={pid} code={exit_code}"),
            Message::Heartbeat { pid, memory } => debug!("[heartbeat] pid={pid} memory={memory}"),
            Message::ProcessBlocked { pid } => debug!("[blocked] pid={pid}"),
            Message::ProcessDetached { pid } => debug!("[detached] pid={pid}"),
            Message::PeriodicScheduled {
                worker_id,
                next_run,
            } => debug!(
                "[scheduled] worker_id={worker_id} next_run={}",
                next_run.to_rfc3339()
            ),
            Message::PeriodicStarted { worker_id, pid } => {
                debug!("[periodic-started] worker_id={worker_id} pid={pid}")
            }
            Message::StopServer => debug!("[stop-requested]"),
            Message::ReloadServer => debug!("[reload-requested]"),
            other => debug!("[message] {:?}", other.kind()),
        }
    }
}

//! # Message bus traits and the in-process bus.
//!
//! - [`MessageBus`]: asynchronous request/response dispatch. Implemented by
//!   [`LocalBus`] in the master and by
//!   [`SocketClient`](crate::messages::SocketClient) in children.
//! - [`MessageHandler`]: handler registry keyed by [`MessageKind`].
//! - [`MessageBusExt`]: typed access to replies.
//!
//! [`LocalBus`] invokes handlers of a kind in registration order and returns
//! the first non-null reply; remaining handlers are skipped once one answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::BusError;
use crate::messages::message::{Message, MessageKind, Reply};

/// Handler invoked synchronously for every dispatched message of its kind.
pub type Handler = Arc<dyn Fn(&Message) -> Reply + Send + Sync>;

/// Token returned by [`MessageHandler::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Asynchronous dispatch of a message to whoever handles it.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn dispatch(&self, message: Message) -> Result<Reply, BusError>;
}

/// Registry of per-kind handlers.
pub trait MessageHandler: Send + Sync {
    fn subscribe(&self, kind: MessageKind, handler: Handler) -> SubscriptionId;

    /// Returns false when the subscription was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Typed view over [`MessageBus`] replies.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Dispatches and decodes the reply; `Ok(None)` when nobody answered.
    async fn request<T>(&self, message: Message) -> Result<Option<T>, BusError>
    where
        T: DeserializeOwned + Send + 'static;
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBusExt for B {
    async fn request<T>(&self, message: Message) -> Result<Option<T>, BusError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.dispatch(message).await? {
            Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

type Subscribers = HashMap<MessageKind, Vec<(SubscriptionId, Handler)>>;

/// In-process bus used by the master.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<Subscribers>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Dispatches without awaiting; all handlers are synchronous.
    pub fn dispatch_now(&self, message: &Message) -> Reply {
        if let Message::Composite { messages } = message {
            for inner in messages {
                self.dispatch_now(inner);
            }
            return Value::Null;
        }

        // Handlers are cloned out so they may subscribe or dispatch re-entrantly.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&message.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            let reply = handler(message);
            if !reply.is_null() {
                return reply;
            }
        }
        Value::Null
    }

    /// Number of handlers registered for a kind.
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}

impl MessageHandler for LocalBus {
    fn subscribe(&self, kind: MessageKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn dispatch(&self, message: Message) -> Result<Reply, BusError> {
        Ok(self.dispatch_now(&message))
    }
}

//! # Named state shared through the bus.
//!
//! The master owns one [`Container`]; children and the control API read and
//! write it with `ContainerGet`, `ContainerSet` and `ContainerHas` messages.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::messages::bus::{MessageHandler, SubscriptionId};
use crate::messages::message::{Message, MessageKind};

/// Container key under which the master publishes its status snapshot.
pub const STATUS_KEY: &str = "server_status";

/// Container key holding the list of open client connections, when a worker
/// chooses to publish it.
pub const CONNECTIONS_KEY: &str = "connections";

#[derive(Debug, Default)]
pub struct Container {
    values: RwLock<HashMap<String, Value>>,
}

impl Container {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Subscribes the container's message handlers on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &dyn MessageHandler) -> Vec<SubscriptionId> {
        let get = self.clone();
        let set = self.clone();
        let has = self.clone();
        vec![
            bus.subscribe(
                MessageKind::ContainerGet,
                Arc::new(move |m| match m {
                    Message::ContainerGet { key } => get.get(key).unwrap_or(Value::Null),
                    _ => Value::Null,
                }),
            ),
            bus.subscribe(
                MessageKind::ContainerSet,
                Arc::new(move |m| {
                    if let Message::ContainerSet { key, value } = m {
                        set.set(key.clone(), value.clone());
                    }
                    Value::Null
                }),
            ),
            bus.subscribe(
                MessageKind::ContainerHas,
                Arc::new(move |m| match m {
                    Message::ContainerHas { key } => Value::Bool(has.has(key)),
                    _ => Value::Null,
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::LocalBus;
    use serde_json::json;

    #[test]
    fn get_set_has_through_bus() {
        let bus = LocalBus::new();
        let container = Container::new();
        container.attach(bus.as_ref());

        assert_eq!(bus.dispatch_now(&Message::container_has("k")), json!(false));
        assert_eq!(bus.dispatch_now(&Message::container_get("k")), Value::Null);

        bus.dispatch_now(&Message::container_set("k", json!({"a": 1})));
        assert_eq!(bus.dispatch_now(&Message::container_has("k")), json!(true));
        assert_eq!(bus.dispatch_now(&Message::container_get("k")), json!({"a": 1}));
        assert_eq!(container.get("k"), Some(json!({"a": 1})));
    }
}

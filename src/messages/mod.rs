//! # Message bus.
//!
//! The master runs a [`LocalBus`] behind a [`SocketServer`]; children talk to
//! it through a [`SocketClient`]. Both sides speak the same [`Message`] model
//! framed by [`codec`].

mod bus;
pub mod codec;
mod container;
mod message;
mod socket;

pub use bus::{Handler, LocalBus, MessageBus, MessageBusExt, MessageHandler, SubscriptionId};
pub use container::{CONNECTIONS_KEY, Container, STATUS_KEY};
pub use message::{Message, MessageKind, Reply};
pub use socket::{DEFAULT_CONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, SocketClient, SocketServer};

//! The `transport` module is the boundary between the session core and the
//! network.
//!
//! A `Connector` opens one `Transport` per connect cycle. The transport's
//! primitives (`connect`, `send`, `bind`, ...) never block: they hand work to
//! the network side and return. Outcomes come back later as `TransportEvent`s
//! pushed through the `EventEmitter` the transport was opened with. Dropping
//! the transport releases it.
//!
//! Two implementations ship with the crate:
//!
//! - `websocket`: JSON frames over a WebSocket connection (`tokio-tungstenite`).
//! - `loopback`: an in-process broker with durable endpoints, used by tests and
//!   the `demo` command.

pub mod event;
pub mod loopback;
pub mod message;
pub mod websocket;

use thiserror::Error;

use crate::consumer::BindingKey;
use crate::message::Message;
use crate::session::SessionProperties;

pub use event::{Envelope, EventEmitter, TransportEvent};
pub use loopback::{LoopbackBroker, LoopbackConnector};
pub use websocket::WsConnector;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported address: {0}")]
    InvalidAddress(String),

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport closed")]
    Closed,

    #[error("no async runtime available: {0}")]
    Runtime(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Opens transports, one per connect cycle.
pub trait Connector: Send {
    fn open(
        &mut self,
        properties: &SessionProperties,
        events: EventEmitter,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// A live handle to the broker, exclusively owned by a session.
pub trait Transport: Send {
    /// Starts establishing the session. Emits `Up` or `ConnectFailed`.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Starts closing the session. Emits `Disconnected`.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Submits a guaranteed message. Emits `Acknowledged` or `Rejected` for
    /// its correlation id.
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Binds a durable endpoint to a topic subscription. Emits `BindUp` or
    /// `BindFailed`, then `Message` for every delivery.
    fn bind(&mut self, binding: &BindingKey) -> Result<(), TransportError>;

    fn unbind(&mut self, binding: &BindingKey) -> Result<(), TransportError>;

    /// Settles a delivery so the broker removes it from the endpoint.
    /// Deliveries that are never acknowledged stay on the endpoint and are
    /// redelivered to the next bind.
    fn ack(&mut self, binding: &BindingKey, message_id: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod websocket_tests;

//! The `consumer` module implements the durable topic endpoint consumer.
//!
//! A `DurableConsumer` is one (endpoint, subscription) binding owned by a
//! session. It walks the bind lifecycle
//!
//! ```text
//! Unbound --start--> Binding --BindUp--> Bound --stop--> Unbound
//!                       |                  |
//!                   BindFailed            Down
//! ```
//!
//! and, while `Bound`, decodes inbound messages and hands them to its
//! `MessageHandler`. `BindFailed` and `Down` are terminal until the consumer
//! is started again.

pub mod decode;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::message::{ContentType, InboundMessage, topic};
use crate::transport::Transport;
use crate::utils::Error;

pub use decode::{Body, DecodeMode};

/// Identity of a binding: the durable endpoint and the topic subscription it
/// attracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    pub endpoint: String,
    pub subscription: String,
}

impl BindingKey {
    pub fn new(endpoint: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subscription: subscription.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.endpoint, self.subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Binding,
    Bound,
    BindFailed,
    Down,
}

impl BindState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindState::Unbound => "Unbound",
            BindState::Binding => "Binding",
            BindState::Bound => "Bound",
            BindState::BindFailed => "BindFailed",
            BindState::Down => "Down",
        }
    }

    /// True while a bind is requested or established.
    pub fn is_active(&self) -> bool {
        matches!(self, BindState::Binding | BindState::Bound)
    }
}

impl fmt::Display for BindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message handed to a consumer's handler.
///
/// `payload` is always the untouched wire bytes; `body` is the decoded view
/// selected by the binding's `DecodeMode`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub binding: BindingKey,
    pub topic: String,
    pub payload: Vec<u8>,
    pub content_type: ContentType,
    pub body: Body,
}

/// Receives the messages delivered to a bound consumer.
///
/// Handlers run on the session's dispatch path and must not call back into
/// the session.
pub trait MessageHandler: Send {
    fn on_message(&mut self, delivery: Delivery);
}

impl<F> MessageHandler for F
where
    F: FnMut(Delivery) + Send,
{
    fn on_message(&mut self, delivery: Delivery) {
        self(delivery)
    }
}

pub struct DurableConsumer {
    key: BindingKey,
    state: BindState,
    decode: DecodeMode,
    handler: Box<dyn MessageHandler>,
    delivered: u64,
}

impl fmt::Debug for DurableConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableConsumer")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("decode", &self.decode)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl DurableConsumer {
    pub fn new(key: BindingKey, decode: DecodeMode, handler: Box<dyn MessageHandler>) -> Self {
        Self {
            key,
            state: BindState::Unbound,
            decode,
            handler,
            delivered: 0,
        }
    }

    pub fn key(&self) -> &BindingKey {
        &self.key
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode
    }

    /// Number of messages handed to the handler so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Requests the bind. A consumer that is already binding or bound is left
    /// alone.
    pub fn start(&mut self, transport: &mut dyn Transport) -> Result<(), Error> {
        if self.state.is_active() {
            info!(binding = %self.key, state = %self.state, "consumer already started");
            return Ok(());
        }
        match transport.bind(&self.key) {
            Ok(()) => {
                self.state = BindState::Binding;
                debug!(binding = %self.key, "bind requested");
                Ok(())
            }
            Err(e) => {
                self.state = BindState::BindFailed;
                Err(e.into())
            }
        }
    }

    /// Returns true when the confirmation moved the consumer to `Bound`.
    pub fn on_bind_up(&mut self) -> bool {
        if self.state != BindState::Binding {
            warn!(binding = %self.key, state = %self.state, "unexpected bind confirmation ignored");
            return false;
        }
        self.state = BindState::Bound;
        info!(binding = %self.key, "=== ready to receive messages ===");
        true
    }

    pub fn on_bind_failed(&mut self, reason: String) -> Option<Error> {
        if self.state != BindState::Binding {
            warn!(binding = %self.key, state = %self.state, %reason, "unexpected bind failure ignored");
            return None;
        }
        self.state = BindState::BindFailed;
        warn!(
            binding = %self.key,
            %reason,
            "could not bind, ensure the durable endpoint exists on the broker"
        );
        Some(Error::BindError {
            endpoint: self.key.endpoint.clone(),
            reason,
        })
    }

    pub fn on_down(&mut self, reason: String) -> Option<Error> {
        if self.state != BindState::Bound {
            warn!(binding = %self.key, state = %self.state, %reason, "unexpected flow down ignored");
            return None;
        }
        self.state = BindState::Down;
        warn!(binding = %self.key, %reason, "consumer is down");
        Some(Error::BindingLost {
            endpoint: self.key.endpoint.clone(),
            reason,
        })
    }

    /// Decodes an inbound message and hands it to the handler.
    ///
    /// Returns `Ok(false)` when the message was dropped because the consumer
    /// is not bound or the topic is outside its subscription. A decode failure
    /// is returned as an error and leaves the consumer bound. Only `Ok(true)`
    /// means the handler has the message.
    pub fn on_message(&mut self, message: InboundMessage) -> Result<bool, Error> {
        if self.state != BindState::Bound {
            warn!(binding = %self.key, state = %self.state, topic = %message.topic, "message for unbound consumer dropped");
            return Ok(false);
        }
        if !topic::matches(&self.key.subscription, &message.topic) {
            warn!(binding = %self.key, topic = %message.topic, "message outside subscription dropped");
            return Ok(false);
        }

        let body = decode::decode(self.decode, &message)?;
        debug!(binding = %self.key, topic = %message.topic, bytes = message.payload.len(), "message received");
        self.delivered += 1;
        self.handler.on_message(Delivery {
            binding: self.key.clone(),
            topic: message.topic,
            payload: message.payload,
            content_type: message.content_type,
            body,
        });
        Ok(true)
    }

    /// Unbinds a bound consumer.
    pub fn stop(&mut self, transport: &mut dyn Transport) -> Result<(), Error> {
        if self.state != BindState::Bound {
            info!(binding = %self.key, state = %self.state, "cannot stop consumer, it is not bound");
            return Err(Error::NotBound {
                endpoint: self.key.endpoint.clone(),
            });
        }
        if let Err(e) = transport.unbind(&self.key) {
            warn!(binding = %self.key, "unbind failed: {e}");
        }
        self.state = BindState::Unbound;
        info!(binding = %self.key, "consumer stopped");
        Ok(())
    }

    /// Forgets the binding after the session went away. Returns true if the
    /// state changed.
    pub fn reset(&mut self) -> bool {
        if self.state == BindState::Unbound {
            return false;
        }
        self.state = BindState::Unbound;
        true
    }
}

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::consumer::BindingKey;
use crate::message::{CorrelationId, InboundMessage};

/// Everything a transport can report back to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Up,
    ConnectFailed {
        reason: String,
    },
    Disconnected,
    Acknowledged {
        correlation_id: CorrelationId,
    },
    Rejected {
        correlation_id: CorrelationId,
        info: String,
    },
    BindUp {
        binding: BindingKey,
    },
    BindFailed {
        binding: BindingKey,
        reason: String,
    },
    Down {
        binding: BindingKey,
        reason: String,
    },
    /// A delivery to a bound endpoint. `message_id` is what the session hands
    /// back to `Transport::ack` once the message reached its handler.
    Message {
        binding: BindingKey,
        message_id: String,
        message: InboundMessage,
    },
}

/// A transport event stamped with the connect cycle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Sending half of a session's event channel, bound to one connect cycle.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    generation: u64,
    sender: UnboundedSender<Envelope>,
}

impl EventEmitter {
    pub fn new(generation: u64, sender: UnboundedSender<Envelope>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event for the session. Returns false once the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let envelope = Envelope {
            generation: self.generation,
            event,
        };
        match self.sender.send(envelope) {
            Ok(()) => true,
            Err(dropped) => {
                debug!(event = ?dropped.0.event, "event channel closed");
                false
            }
        }
    }
}

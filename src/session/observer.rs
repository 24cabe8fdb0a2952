use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::consumer::BindingKey;
use crate::message::CorrelationId;
use crate::publisher::DeliveryOutcome;
use crate::session::SessionState;
use crate::utils::Error;

/// What a session reports to its observer.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Terminal outcome of a guaranteed message. Reported once per id.
    Outcome {
        correlation_id: CorrelationId,
        outcome: DeliveryOutcome,
    },
    BindingUp {
        binding: BindingKey,
    },
    /// A binding went back to `Unbound` because the session went down.
    BindingReset {
        binding: BindingKey,
    },
    /// An asynchronous failure: `ConnectionError`, `BindError`,
    /// `BindingLost` or `Decode`.
    Failure(Error),
}

/// Sink for session events, injected at construction.
pub trait SessionObserver: Send {
    fn notify(&mut self, event: SessionEvent);
}

impl SessionObserver for UnboundedSender<SessionEvent> {
    fn notify(&mut self, event: SessionEvent) {
        if self.send(event).is_err() {
            debug!("session observer channel closed");
        }
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn notify(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => info!(%from, %to, "session state changed"),
            SessionEvent::Outcome {
                correlation_id,
                outcome: DeliveryOutcome::Delivered,
            } => info!("Delivery of message with correlation id {correlation_id} confirmed."),
            SessionEvent::Outcome {
                correlation_id,
                outcome,
            } => warn!(?outcome, "Delivery of message with correlation id {correlation_id} failed."),
            SessionEvent::BindingUp { binding } => info!(%binding, "binding up"),
            SessionEvent::BindingReset { binding } => info!(%binding, "binding reset"),
            SessionEvent::Failure(error) => warn!("{error}"),
        }
    }
}

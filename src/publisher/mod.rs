//! Guaranteed publisher
//!
//! This module builds persistent messages and tracks them until the broker
//! settles them:
//! - every message gets a correlation id from a per-session counter
//! - the id is registered with the `CorrelationTracker` before the message
//!   reaches the transport
//! - `Acknowledged` / `Rejected` events resolve the id exactly once; anything
//!   arriving for an unknown id is logged and ignored
//! - on disconnect, or when the optional ack timeout elapses, pending ids are
//!   resolved locally as `Abandoned`
//!
//! The publisher holds no transport of its own. The session passes its
//! handle in on every call.

pub mod tracker;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::message::{ContentType, CorrelationId, Message, topic};
use crate::transport::Transport;
use crate::utils::Error;

pub use tracker::{CorrelationTracker, PendingEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The session went down before the broker answered.
    SessionClosed,
    /// No answer within the configured ack timeout.
    TimedOut,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::SessionClosed => f.write_str("session closed before acknowledgment"),
            AbandonReason::TimedOut => f.write_str("acknowledgment timed out"),
        }
    }
}

/// Terminal outcome of one guaranteed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Rejected { info: String },
    Abandoned { reason: AbandonReason },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            DeliveryOutcome::Delivered => Ok(()),
            DeliveryOutcome::Rejected { info } => Err(Error::Rejected { info }),
            DeliveryOutcome::Abandoned { reason } => Err(Error::Abandoned { reason }),
        }
    }
}

#[derive(Debug, Default)]
pub struct GuaranteedPublisher {
    tracker: CorrelationTracker,
    last_id: u64,
    ack_timeout: Option<Duration>,
}

impl GuaranteedPublisher {
    pub fn new(ack_timeout: Option<Duration>) -> Self {
        Self {
            tracker: CorrelationTracker::new(),
            last_id: 0,
            ack_timeout,
        }
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Builds a persistent message, registers it as pending and submits it.
    ///
    /// Returns the correlation id without waiting for the acknowledgment. If
    /// the transport refuses the message the pending entry is withdrawn.
    pub fn publish(
        &mut self,
        transport: &mut dyn Transport,
        topic: &str,
        payload: Vec<u8>,
        content_type: ContentType,
    ) -> Result<CorrelationId, Error> {
        topic::validate_topic(topic)?;

        let id = self.next_id();
        let message = Arc::new(Message::persistent(topic, payload, content_type).with_correlation_id(id));
        self.tracker
            .register(id, Arc::clone(&message), Instant::now())?;

        if let Err(e) = transport.send(&message) {
            self.tracker.resolve(id);
            warn!(correlation_id = %id, topic, "message not sent: {e}");
            return Err(e.into());
        }

        debug!(correlation_id = %id, topic, bytes = message.payload.len(), "message sent");
        Ok(id)
    }

    /// Settles `id` with `outcome`. Returns `None` when the id is not pending
    /// (already settled, abandoned, or never issued).
    pub fn resolve(&mut self, id: CorrelationId, outcome: DeliveryOutcome) -> Option<DeliveryOutcome> {
        let Some(entry) = self.tracker.resolve(id) else {
            warn!(correlation_id = %id, ?outcome, "outcome for unknown correlation id ignored");
            return None;
        };
        let elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64;
        match &outcome {
            DeliveryOutcome::Delivered => {
                info!(correlation_id = %id, elapsed_ms, "delivery confirmed")
            }
            DeliveryOutcome::Rejected { info } => {
                warn!(correlation_id = %id, elapsed_ms, %info, "delivery rejected")
            }
            DeliveryOutcome::Abandoned { reason } => {
                warn!(correlation_id = %id, elapsed_ms, %reason, "delivery abandoned")
            }
        }
        Some(outcome)
    }

    /// Abandons every pending message because the session is going away.
    pub fn abandon_all(&mut self) -> Vec<(CorrelationId, DeliveryOutcome)> {
        let abandoned = abandon(self.tracker.drain(), AbandonReason::SessionClosed);
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "pending messages abandoned on disconnect");
        }
        abandoned
    }

    /// Abandons the messages older than the ack timeout. Does nothing when no
    /// timeout is configured.
    pub fn expire(&mut self, now: Instant) -> Vec<(CorrelationId, DeliveryOutcome)> {
        let Some(timeout) = self.ack_timeout else {
            return Vec::new();
        };
        let expired = abandon(self.tracker.expire(now, timeout), AbandonReason::TimedOut);
        for (id, _) in &expired {
            warn!(correlation_id = %id, timeout_ms = timeout.as_millis() as u64, "no acknowledgment in time");
        }
        expired
    }

    fn next_id(&mut self) -> CorrelationId {
        self.last_id = self.last_id.wrapping_add(1);
        CorrelationId::new(self.last_id)
    }
}

fn abandon(
    entries: Vec<(CorrelationId, PendingEntry)>,
    reason: AbandonReason,
) -> Vec<(CorrelationId, DeliveryOutcome)> {
    entries
        .into_iter()
        .map(|(id, _)| (id, DeliveryOutcome::Abandoned { reason }))
        .collect()
}

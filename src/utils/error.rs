//! The `error` module defines the error taxonomy shared by the session,
//! the guaranteed publisher and the durable consumer.
//!
//! Synchronous calls (`connect`, `publish`, `start_consume`, ...) return
//! `Result<T, Error>`. Failures that happen later, on the event stream, are
//! handed to the session observer as `SessionEvent::Failure(Error)`. None of
//! them is fatal to the session itself.

use thiserror::Error;

use crate::message::CorrelationId;
use crate::publisher::AbandonReason;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed connection parameters. Detected before any
    /// transport is opened and never retried.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    /// A topic, endpoint name or subscription was rejected locally.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport could not establish the session.
    #[error("connection failed: {reason}")]
    ConnectionError { reason: String },

    #[error("session is not connected")]
    NotConnected,

    #[error("consumer for endpoint \"{endpoint}\" is not bound")]
    NotBound { endpoint: String },

    /// A freshly allocated correlation id was already in flight. Fatal to the
    /// publish call only.
    #[error("correlation id {0} is already in flight")]
    CorrelationCollision(CorrelationId),

    /// The broker refused a guaranteed message.
    #[error("message rejected by broker: {info}")]
    Rejected { info: String },

    /// The endpoint could not be bound, usually because it has not been
    /// provisioned on the broker or the client lacks consume permission.
    #[error("could not bind to endpoint \"{endpoint}\": {reason}")]
    BindError { endpoint: String, reason: String },

    /// A bound endpoint went down. The consumer has to be started again.
    #[error("binding to endpoint \"{endpoint}\" lost: {reason}")]
    BindingLost { endpoint: String, reason: String },

    /// A guaranteed message never got an acknowledgment.
    #[error("message abandoned: {reason}")]
    Abandoned { reason: AbandonReason },

    /// An inbound message did not match the decode path requested by its
    /// binding. Only that message is dropped.
    #[error("could not decode message on topic \"{topic}\": {reason}")]
    Decode { topic: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

//! Message types shared by the publisher, the consumer and the transports.
//!
//! `Message` is what the publisher hands to a transport; `InboundMessage` is
//! what a transport hands back to a bound consumer. Both carry the raw payload
//! bytes untouched together with the declared `ContentType`, so a consumer can
//! choose a decode path without the transport having to know about it.

pub mod topic;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token linking an outbound guaranteed message to its later outcome.
///
/// Unique among in-flight messages of one session. Ids may repeat across
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared body type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Binary,
    Text,
    /// A JSON container.
    Structured,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Binary => "binary",
            ContentType::Text => "text",
            ContentType::Structured => "structured",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Direct,
    #[default]
    Persistent,
}

/// An outbound message.
///
/// # Fields
///
/// - `topic` - hierarchical destination, levels separated by `/`.
/// - `payload` - raw body bytes.
/// - `content_type` - how consumers should interpret `payload`.
/// - `delivery_mode` - always `Persistent` for messages built by the
///   guaranteed publisher.
/// - `correlation_id` - set by the publisher before submission.
/// - `timestamp` - milliseconds since the UNIX epoch at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub content_type: ContentType,
    pub delivery_mode: DeliveryMode,
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: i64,
}

impl Message {
    pub fn persistent(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        content_type: ContentType,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            content_type,
            delivery_mode: DeliveryMode::Persistent,
            correlation_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// A message delivered by the broker to a bound durable endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub content_type: ContentType,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            content_type: ContentType::Binary,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }
}

impl From<&Message> for InboundMessage {
    fn from(message: &Message) -> Self {
        Self {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            content_type: message.content_type,
        }
    }
}

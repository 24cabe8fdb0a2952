//! JSON frames exchanged with the broker over WebSocket.

use serde::{Deserialize, Serialize};

use crate::consumer::BindingKey;
use crate::message::{ContentType, CorrelationId, DeliveryMode, InboundMessage, Message};
use crate::transport::TransportEvent;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "login")]
    Login {
        namespace: String,
        username: String,
        password: String,
        client_name: String,
    },
    #[serde(rename = "publish")]
    Publish {
        correlation_id: Option<CorrelationId>,
        topic: String,
        payload: Vec<u8>,
        content_type: ContentType,
        delivery_mode: DeliveryMode,
        timestamp: i64,
    },
    #[serde(rename = "bind")]
    Bind {
        endpoint: String,
        subscription: String,
    },
    #[serde(rename = "unbind")]
    Unbind {
        endpoint: String,
        subscription: String,
    },
    #[serde(rename = "ack")]
    Ack { endpoint: String, message_id: String },
}

impl ClientFrame {
    pub fn publish(message: &Message) -> Self {
        ClientFrame::Publish {
            correlation_id: message.correlation_id,
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            content_type: message.content_type,
            delivery_mode: message.delivery_mode,
            timestamp: message.timestamp,
        }
    }

    pub fn bind(binding: &BindingKey) -> Self {
        ClientFrame::Bind {
            endpoint: binding.endpoint.clone(),
            subscription: binding.subscription.clone(),
        }
    }

    pub fn unbind(binding: &BindingKey) -> Self {
        ClientFrame::Unbind {
            endpoint: binding.endpoint.clone(),
            subscription: binding.subscription.clone(),
        }
    }

    pub fn ack(binding: &BindingKey, message_id: &str) -> Self {
        ClientFrame::Ack {
            endpoint: binding.endpoint.clone(),
            message_id: message_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "login_ok")]
    LoginOk,
    #[serde(rename = "login_failed")]
    LoginFailed { reason: String },
    #[serde(rename = "acknowledged")]
    Acknowledged { correlation_id: CorrelationId },
    #[serde(rename = "rejected")]
    Rejected {
        correlation_id: CorrelationId,
        info: String,
    },
    #[serde(rename = "bind_ok")]
    BindOk {
        endpoint: String,
        subscription: String,
    },
    #[serde(rename = "bind_failed")]
    BindFailed {
        endpoint: String,
        subscription: String,
        reason: String,
    },
    #[serde(rename = "flow_down")]
    FlowDown {
        endpoint: String,
        subscription: String,
        reason: String,
    },
    #[serde(rename = "message")]
    Message {
        endpoint: String,
        subscription: String,
        message_id: String,
        topic: String,
        payload: Vec<u8>,
        #[serde(default)]
        content_type: ContentType,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    /// Maps a frame received after login onto a session event. Login and error
    /// frames have no event counterpart.
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            ServerFrame::Acknowledged { correlation_id } => {
                Some(TransportEvent::Acknowledged { correlation_id })
            }
            ServerFrame::Rejected {
                correlation_id,
                info,
            } => Some(TransportEvent::Rejected {
                correlation_id,
                info,
            }),
            ServerFrame::BindOk {
                endpoint,
                subscription,
            } => Some(TransportEvent::BindUp {
                binding: BindingKey::new(endpoint, subscription),
            }),
            ServerFrame::BindFailed {
                endpoint,
                subscription,
                reason,
            } => Some(TransportEvent::BindFailed {
                binding: BindingKey::new(endpoint, subscription),
                reason,
            }),
            ServerFrame::FlowDown {
                endpoint,
                subscription,
                reason,
            } => Some(TransportEvent::Down {
                binding: BindingKey::new(endpoint, subscription),
                reason,
            }),
            ServerFrame::Message {
                endpoint,
                subscription,
                message_id,
                topic,
                payload,
                content_type,
            } => Some(TransportEvent::Message {
                binding: BindingKey::new(endpoint, subscription),
                message_id,
                message: InboundMessage {
                    topic,
                    payload,
                    content_type,
                },
            }),
            ServerFrame::LoginOk | ServerFrame::LoginFailed { .. } | ServerFrame::Error { .. } => {
                None
            }
        }
    }
}

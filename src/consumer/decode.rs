use std::str::FromStr;

use crate::message::{ContentType, InboundMessage};
use crate::utils::Error;

/// How a binding interprets the payload of inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Hand over the bytes only.
    Raw,
    /// Follow the declared content type of each message.
    #[default]
    Auto,
    /// Like `Auto`, but any other declared content type fails the message.
    Expect(ContentType),
}

impl FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(DecodeMode::Raw),
            "auto" => Ok(DecodeMode::Auto),
            "binary" => Ok(DecodeMode::Expect(ContentType::Binary)),
            "text" => Ok(DecodeMode::Expect(ContentType::Text)),
            "structured" => Ok(DecodeMode::Expect(ContentType::Structured)),
            other => Err(format!(
                "unknown decode mode '{other}', expected raw, auto, binary, text or structured"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No decoded view; read `Delivery::payload`.
    Binary,
    Text(String),
    Structured(serde_json::Value),
}

pub fn decode(mode: DecodeMode, message: &InboundMessage) -> Result<Body, Error> {
    let fail = |reason: String| Error::Decode {
        topic: message.topic.clone(),
        reason,
    };

    match mode {
        DecodeMode::Raw => return Ok(Body::Binary),
        DecodeMode::Expect(expected) if expected != message.content_type => {
            return Err(fail(format!(
                "expected {expected} content, message declares {}",
                message.content_type
            )));
        }
        DecodeMode::Auto | DecodeMode::Expect(_) => {}
    }

    match message.content_type {
        ContentType::Binary => Ok(Body::Binary),
        ContentType::Text => std::str::from_utf8(&message.payload)
            .map(|text| Body::Text(text.to_string()))
            .map_err(|e| fail(format!("text payload is not UTF-8: {e}"))),
        ContentType::Structured => serde_json::from_slice(&message.payload)
            .map(Body::Structured)
            .map_err(|e| fail(format!("structured payload is not JSON: {e}"))),
    }
}

//! Wire codec for the streaming endpoint.
//!
//! Frames are JSON objects discriminated by a `type` field. Two discriminants
//! are control frames owned by the connection itself (`hello` and
//! `reconnect_url`); replies to our own sends carry `reply_to` instead of a
//! type. Everything else is an ordinary [`InboundEvent`].

use serde_json::{Map, Value};

use crate::error::{CodecError, CodecResult};
use crate::event::InboundEvent;

/// Sent once by the service when a session is ready.
pub const HELLO: &str = "hello";

/// Pushes a new endpoint URL for the next reconnect.
pub const RECONNECT_URL: &str = "reconnect_url";

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Session handshake completed.
    Hello,
    /// Endpoint migration.
    ReconnectUrl(String),
    /// Acknowledgement of an outbound payload, correlated by sequence id.
    Ack {
        /// The `id` of the payload being acknowledged.
        reply_to: u64,
        /// Whether the service accepted it.
        ok: bool,
    },
    /// Any other event, forwarded to the message callback.
    Event(InboundEvent),
}

fn parse_object(bytes: &[u8]) -> CodecResult<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CodecError::Malformed(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(CodecError::Malformed(e.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decodes a frame into an event.
///
/// Fails on malformed JSON or a missing `type` discriminant.
pub fn decode(bytes: &[u8]) -> CodecResult<InboundEvent> {
    let attrs = parse_object(bytes)?;
    let kind = attrs
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_string();
    Ok(InboundEvent::new(kind, attrs))
}

/// Decodes and classifies a frame.
pub fn decode_frame(bytes: &[u8]) -> CodecResult<Frame> {
    let attrs = parse_object(bytes)?;

    let Some(kind) = attrs.get("type").and_then(Value::as_str) else {
        if let Some(reply_to) = attrs.get("reply_to").and_then(Value::as_u64) {
            let ok = attrs.get("ok").and_then(Value::as_bool).unwrap_or(false);
            return Ok(Frame::Ack { reply_to, ok });
        }
        return Err(CodecError::MissingType);
    };

    match kind {
        HELLO => Ok(Frame::Hello),
        RECONNECT_URL => attrs
            .get("url")
            .and_then(Value::as_str)
            .map(|url| Frame::ReconnectUrl(url.to_string()))
            .ok_or_else(|| CodecError::Malformed("reconnect_url frame without url".into())),
        _ => {
            let kind = kind.to_string();
            Ok(Frame::Event(InboundEvent::new(kind, attrs)))
        }
    }
}

/// Encodes an outbound payload.
pub fn encode(payload: &Map<String, Value>) -> CodecResult<String> {
    serde_json::to_string(payload).map_err(|e| CodecError::Encode(e.to_string()))
}

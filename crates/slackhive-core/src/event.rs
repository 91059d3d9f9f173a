//! Inbound event model.
//!
//! An [`InboundEvent`] is a decoded streaming frame: a `type` discriminant plus
//! the untyped attribute object it arrived with. It is immutable once decoded.
//! An [`EnrichedEvent`] wraps a shared event together with the resolved
//! channel and user display names; enrichment never touches the original.

use std::sync::Arc;

use serde_json::{Map, Value};

/// Discriminant of the plain chat message event.
pub const MESSAGE: &str = "message";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    kind: String,
    attrs: Map<String, Value>,
}

impl InboundEvent {
    /// Creates an event from a discriminant and its attribute object.
    ///
    /// The `type` attribute is forced to `kind` so the two never disagree.
    pub fn new(kind: impl Into<String>, mut attrs: Map<String, Value>) -> Self {
        let kind = kind.into();
        attrs.insert("type".into(), Value::String(kind.clone()));
        Self { kind, attrs }
    }

    /// Convenience constructor for a plain message event.
    pub fn message(channel: &str, user: &str, text: &str) -> Self {
        let mut attrs = Map::new();
        attrs.insert("channel".into(), channel.into());
        attrs.insert("user".into(), user.into());
        attrs.insert("text".into(), text.into());
        Self::new(MESSAGE, attrs)
    }

    /// Returns a copy of this event with one attribute set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.attrs.insert(key, value.into());
        }
        self
    }

    /// The `type` discriminant.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// All attributes, including `type`.
    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    /// Looks up a raw attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Looks up a string attribute.
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn channel(&self) -> Option<&str> {
        self.str_attr("channel")
    }

    pub fn user(&self) -> Option<&str> {
        self.str_attr("user")
    }

    pub fn text(&self) -> Option<&str> {
        self.str_attr("text")
    }

    pub fn subtype(&self) -> Option<&str> {
        self.str_attr("subtype")
    }

    pub fn ts(&self) -> Option<&str> {
        self.str_attr("ts")
    }

    /// Returns true for the plain message discriminant.
    pub fn is_message(&self) -> bool {
        self.kind == MESSAGE
    }

    /// Consumes the event, returning its attribute object.
    pub fn into_attrs(self) -> Map<String, Value> {
        self.attrs
    }
}

/// An inbound event augmented with human-readable names.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    event: Arc<InboundEvent>,
    channel_name: String,
    user_name: String,
}

impl EnrichedEvent {
    /// Wraps a shared event with its resolved names.
    pub fn new(
        event: Arc<InboundEvent>,
        channel_name: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            event,
            channel_name: channel_name.into(),
            user_name: user_name.into(),
        }
    }

    /// The original, unmodified event.
    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    /// Shared handle to the original event.
    pub fn shared(&self) -> Arc<InboundEvent> {
        Arc::clone(&self.event)
    }

    /// Resolved channel name, or a direct/group label, or the raw id.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Resolved user name, or the raw id when unknown.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Message text; empty when the event carries none.
    pub fn text(&self) -> &str {
        self.event.text().unwrap_or_default()
    }

    pub fn channel(&self) -> Option<&str> {
        self.event.channel()
    }

    pub fn user(&self) -> Option<&str> {
        self.event.user()
    }

    pub fn kind(&self) -> &str {
        self.event.kind()
    }

    /// Flattens the event into one object with `channelname` and `username`
    /// added, the shape handler code written against raw JSON expects.
    pub fn to_value(&self) -> Value {
        let mut attrs = self.event.attrs().clone();
        attrs.insert("channelname".into(), self.channel_name.clone().into());
        attrs.insert("username".into(), self.user_name.clone().into());
        Value::Object(attrs)
    }
}

//! Outbound payload model.
//!
//! A post is assembled from three layers, later layers winning:
//! global [`PostOptions`], the handler's own [`PostOptions`], and the fields
//! of the handler's reply. The target channel is injected last by routing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An untyped outbound payload object.
pub type Payload = Map<String, Value>;

/// Default author name for posts.
pub const DEFAULT_BOT_NAME: &str = "InstantSlackBot";

/// Which transport delivers a handler's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `chat.postMessage` over the request/response API. Supports icons,
    /// attachments and link formatting.
    #[default]
    WebApi,
    /// A `message` frame on the streaming connection. Plain text only.
    Stream,
}

/// Where a handler's response is posted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTo {
    /// The channel the event arrived on.
    #[default]
    Origin,
    /// A direct message to the event's author.
    DirectMessage,
    /// A channel by name.
    Channel(String),
}

/// A layer of post fields (author name, icon, formatting flags).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostOptions(Payload);

impl PostOptions {
    /// An empty layer.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// The stock global defaults, authored as `name`.
    pub fn defaults(name: &str) -> Self {
        Self::new()
            .username(name)
            .icon_emoji(":squirrel:")
            .set("as_user", false)
            .set("link_names", true)
            .set("parse", "none")
            .set("unfurl_links", false)
    }

    /// Sets an arbitrary field.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets the author name.
    pub fn username(self, name: impl Into<String>) -> Self {
        self.set("username", name.into())
    }

    /// Sets an emoji icon, e.g. `:robot_face:`.
    pub fn icon_emoji(self, emoji: impl Into<String>) -> Self {
        self.set("icon_emoji", emoji.into())
    }

    /// Sets an image icon.
    pub fn icon_url(self, url: impl Into<String>) -> Self {
        self.set("icon_url", url.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Payload {
        &self.0
    }

    /// Copies every field of `other` over this layer.
    pub fn extend(&mut self, other: &PostOptions) {
        overlay(&mut self.0, &other.0);
    }
}

impl From<Payload> for PostOptions {
    fn from(map: Payload) -> Self {
        Self(map)
    }
}

/// Copies every field of `top` onto `base`, replacing existing keys.
pub fn overlay(base: &mut Payload, top: &Payload) {
    for (key, value) in top {
        base.insert(key.clone(), value.clone());
    }
}

/// Builds the final post: `global` < `handler` < `reply`.
pub fn merge_post(global: &PostOptions, handler: &PostOptions, reply: &Payload) -> Payload {
    let mut merged = global.0.clone();
    overlay(&mut merged, &handler.0);
    overlay(&mut merged, reply);
    merged
}

/// The minimal payload a plain string reply becomes.
pub fn text_payload(text: impl Into<String>) -> Payload {
    let mut payload = Map::new();
    payload.insert("text".into(), Value::String(text.into()));
    payload
}

/// Reduces a post to the fields a streaming `message` frame accepts.
pub fn stream_message(post: &Payload) -> Payload {
    let mut frame = Map::new();
    frame.insert("type".into(), "message".into());
    for key in ["channel", "text", "thread_ts"] {
        if let Some(value) = post.get(key) {
            frame.insert(key.into(), value.clone());
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_precedence() {
        let global = PostOptions::defaults("hive");
        let handler = PostOptions::new().username("greeter").icon_emoji(":wave:");
        let mut reply = text_payload("hello");
        reply.insert("icon_emoji".into(), json!(":tada:"));

        let post = merge_post(&global, &handler, &reply);
        assert_eq!(post["username"], "greeter");
        assert_eq!(post["icon_emoji"], ":tada:");
        assert_eq!(post["parse"], "none");
        assert_eq!(post["text"], "hello");
    }

    #[test]
    fn test_stream_message_strips_decorations() {
        let mut post = merge_post(
            &PostOptions::defaults("hive"),
            &PostOptions::new(),
            &text_payload("hi"),
        );
        post.insert("channel".into(), json!("C1"));
        let frame = stream_message(&post);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["channel"], "C1");
        assert!(frame.get("icon_emoji").is_none());
    }

    #[test]
    fn test_route_serde_names() {
        assert_eq!(serde_json::to_value(Route::WebApi).unwrap(), json!("web_api"));
        let reply_to: ReplyTo = serde_json::from_value(json!({"channel": "ops"})).unwrap();
        assert_eq!(reply_to, ReplyTo::Channel("ops".into()));
    }
}

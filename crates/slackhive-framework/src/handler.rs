//! The handler (bot) model.
//!
//! A [`Handler`] is a match/act unit: ordered [`Condition`]s combined with a
//! [`Logic`], and an action that turns a matching event into a [`Reply`].
//!
//! ```rust,ignore
//! use slackhive_framework::{Handler, Reply};
//!
//! let greeter = Handler::new("greeter")
//!     .phrase("hello")
//!     .phrase("hi")
//!     .reply(|event| format!("Hello, {}!", event.user_name()));
//!
//! let deployer = Handler::new("deployer")
//!     .all()
//!     .pattern(regex::Regex::new(r"^deploy \w+$")?)
//!     .when(|event| event.channel_name() == "ops")
//!     .action(|event| async move {
//!         let target = event.text().trim_start_matches("deploy ").to_string();
//!         Ok(Reply::from(format!("deploying {target}")))
//!     });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use slackhive_core::{EnrichedEvent, Payload, PostOptions, ReplyTo, Route, merge_post, text_payload};

use crate::condition::Condition;
use crate::error::HandlerResult;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handler action.
pub type ActionFn = Arc<dyn Fn(EnrichedEvent) -> BoxFuture<'static, HandlerResult<Reply>> + Send + Sync>;

// ============================================================================
// Logic
// ============================================================================

/// How a handler's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    /// Every condition must match.
    And,
    /// At least one condition must match.
    #[default]
    Or,
}

// ============================================================================
// Reply
// ============================================================================

/// What a handler's action produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// Matched, but nothing is posted.
    #[default]
    Silent,
    /// Plain text, wrapped into a minimal text payload.
    Text(String),
    /// Structured fields, merged over the post defaults.
    Payload(Payload),
}

impl Reply {
    /// The payload this reply contributes, or `None` when silent.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Silent => None,
            Self::Text(text) if text.is_empty() => None,
            Self::Text(text) => Some(text_payload(text)),
            Self::Payload(map) if map.is_empty() => None,
            Self::Payload(map) => Some(map),
        }
    }

    pub fn is_silent(&self) -> bool {
        match self {
            Self::Silent => true,
            Self::Text(text) => text.is_empty(),
            Self::Payload(map) => map.is_empty(),
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Self::Silent
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Payload> for Reply {
    fn from(map: Payload) -> Self {
        Self::Payload(map)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Silent,
            Value::String(text) => Self::Text(text),
            Value::Object(map) => Self::Payload(map),
            other => Self::Text(other.to_string()),
        }
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Silent, Into::into)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Internal data for a Handler.
///
/// Wrapped in an `Arc` so registered handlers clone cheaply into workers.
#[derive(Clone)]
struct HandlerInner {
    name: String,
    conditions: Vec<Condition>,
    logic: Logic,
    action: Option<ActionFn>,
    route: Route,
    reply_to: ReplyTo,
    post: PostOptions,
    concurrency: Option<usize>,
    timeout: Option<Duration>,
}

/// A condition + action unit evaluated against every inbound message.
///
/// A handler with no conditions never matches; a handler with no action
/// matches silently.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl Handler {
    /// Creates a handler with no conditions and no action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                name: name.into(),
                conditions: Vec::new(),
                logic: Logic::default(),
                action: None,
                route: Route::default(),
                reply_to: ReplyTo::default(),
                post: PostOptions::new(),
                concurrency: None,
                timeout: None,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut HandlerInner {
        Arc::make_mut(&mut self.inner)
    }

    /// Appends a condition. Conditions are evaluated in the order added.
    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.inner_mut().conditions.push(condition.into());
        self
    }

    /// Appends a word-bounded, case-insensitive literal condition.
    pub fn phrase(self, text: impl Into<String>) -> Self {
        self.condition(Condition::phrase(text))
    }

    /// Appends a regular-expression condition.
    pub fn pattern(self, regex: Regex) -> Self {
        self.condition(Condition::Pattern(regex))
    }

    /// Appends a predicate condition.
    pub fn when<F>(self, f: F) -> Self
    where
        F: Fn(&EnrichedEvent) -> bool + Send + Sync + 'static,
    {
        self.condition(Condition::predicate(f))
    }

    /// Sets how conditions combine.
    pub fn logic(mut self, logic: Logic) -> Self {
        self.inner_mut().logic = logic;
        self
    }

    /// Requires every condition to match.
    pub fn all(self) -> Self {
        self.logic(Logic::And)
    }

    /// Requires any condition to match (the default).
    pub fn any(self) -> Self {
        self.logic(Logic::Or)
    }

    /// Sets an async action.
    pub fn action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(EnrichedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Reply>> + Send + 'static,
    {
        self.inner_mut().action = Some(Arc::new(move |event| Box::pin(f(event))));
        self
    }

    /// Sets a synchronous action whose result converts into a [`Reply`].
    pub fn reply<F, R>(self, f: F) -> Self
    where
        F: Fn(&EnrichedEvent) -> R + Send + Sync + 'static,
        R: Into<Reply> + Send + 'static,
    {
        let f = Arc::new(f);
        self.action(move |event| {
            let f = Arc::clone(&f);
            async move { Ok(f(&event).into()) }
        })
    }

    /// Replies with fixed text.
    pub fn text(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.reply(move |_| text.clone())
    }

    /// Sets the transport used for replies.
    pub fn route(mut self, route: Route) -> Self {
        self.inner_mut().route = route;
        self
    }

    /// Sets where replies are posted.
    pub fn reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.inner_mut().reply_to = reply_to;
        self
    }

    /// Sets this handler's post options layer.
    pub fn post(mut self, post: PostOptions) -> Self {
        self.inner_mut().post = post;
        self
    }

    /// Overrides the author name of replies.
    pub fn username(mut self, name: impl Into<String>) -> Self {
        let inner = self.inner_mut();
        inner.post = std::mem::take(&mut inner.post).username(name);
        self
    }

    /// Overrides the emoji icon of replies.
    pub fn icon_emoji(mut self, emoji: impl Into<String>) -> Self {
        let inner = self.inner_mut();
        inner.post = std::mem::take(&mut inner.post).icon_emoji(emoji);
        self
    }

    /// Caps how many workers may run this handler at once.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.inner_mut().concurrency = Some(limit.max(1));
        self
    }

    /// Cancels the action if it runs longer than `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.inner_mut().timeout = Some(limit);
        self
    }

    pub fn get_name(&self) -> &str {
        &self.inner.name
    }

    pub fn get_logic(&self) -> Logic {
        self.inner.logic
    }

    pub fn get_route(&self) -> Route {
        self.inner.route
    }

    pub fn get_reply_to(&self) -> &ReplyTo {
        &self.inner.reply_to
    }

    pub fn get_post(&self) -> &PostOptions {
        &self.inner.post
    }

    pub fn get_concurrency(&self) -> Option<usize> {
        self.inner.concurrency
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Returns the number of conditions.
    pub fn condition_count(&self) -> usize {
        self.inner.conditions.len()
    }

    /// Applies the handler's logic over its conditions, in declaration order,
    /// short-circuiting.
    pub fn evaluate(&self, event: &EnrichedEvent) -> bool {
        let conditions = &self.inner.conditions;
        if conditions.is_empty() {
            return false;
        }
        match self.inner.logic {
            Logic::Or => conditions.iter().any(|c| c.matches(event)),
            Logic::And => conditions.iter().all(|c| c.matches(event)),
        }
    }

    /// Runs the action and builds the post: `global` < handler post options
    /// < reply fields. Returns `None` for a silent reply.
    pub async fn act(
        &self,
        event: EnrichedEvent,
        global: &PostOptions,
    ) -> HandlerResult<Option<Payload>> {
        let Some(action) = &self.inner.action else {
            return Ok(None);
        };
        let reply = action(event).await?;
        Ok(reply
            .into_payload()
            .map(|fields| merge_post(global, &self.inner.post, &fields)))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.inner.name)
            .field("conditions", &self.inner.conditions)
            .field("logic", &self.inner.logic)
            .field("route", &self.inner.route)
            .field("reply_to", &self.inner.reply_to)
            .field("concurrency", &self.inner.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use serde_json::json;
    use slackhive_core::InboundEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn event(text: &str) -> EnrichedEvent {
        EnrichedEvent::new(
            Arc::new(InboundEvent::message("C1", "U1", text)),
            "general",
            "alice",
        )
    }

    fn flag(value: bool) -> impl Fn(&EnrichedEvent) -> bool + Send + Sync + 'static {
        move |_| value
    }

    #[test]
    fn test_or_and_truth_tables() {
        for a in [false, true] {
            for b in [false, true] {
                let or = Handler::new("or").when(flag(a)).when(flag(b));
                let and = Handler::new("and").all().when(flag(a)).when(flag(b));
                assert_eq!(or.evaluate(&event("x")), a || b);
                assert_eq!(and.evaluate(&event("x")), a && b);

                // De Morgan: AND over (A, B) is the negation of OR over (!A, !B).
                let negated = Handler::new("neg").when(flag(!a)).when(flag(!b));
                assert_eq!(and.evaluate(&event("x")), !negated.evaluate(&event("x")));
            }
        }
    }

    #[test]
    fn test_no_conditions_never_match() {
        let handler = Handler::new("empty").text("unreachable");
        assert!(!handler.evaluate(&event("anything")));
        assert!(!handler.all().evaluate(&event("anything")));
    }

    #[test]
    fn test_short_circuit_in_declaration_order() {
        let seen = Arc::new(AtomicUsize::new(0));
        let record = |slot: usize, result: bool| {
            let seen = Arc::clone(&seen);
            move |_: &EnrichedEvent| {
                seen.fetch_or(1 << slot, Ordering::SeqCst);
                result
            }
        };

        let or = Handler::new("or").when(record(0, true)).when(record(1, true));
        assert!(or.evaluate(&event("x")));
        assert_eq!(seen.swap(0, Ordering::SeqCst), 0b01);

        let and = Handler::new("and")
            .all()
            .when(record(0, false))
            .when(record(1, true));
        assert!(!and.evaluate(&event("x")));
        assert_eq!(seen.load(Ordering::SeqCst), 0b01);
    }

    #[test]
    fn test_phrase_condition_through_handler() {
        let handler = Handler::new("hi").phrase("hi");
        assert!(handler.evaluate(&event("hi @bob")));
        assert!(!handler.evaluate(&event("chihuahua")));
    }

    #[tokio::test]
    async fn test_string_reply_becomes_text_payload() {
        let handler = Handler::new("echo")
            .phrase("echo")
            .reply(|e| e.text().to_uppercase());
        let post = assert_ok!(handler.act(event("echo me"), &PostOptions::new()).await);
        assert_eq!(post, Some(text_payload("ECHO ME")));
    }

    #[tokio::test]
    async fn test_silent_replies_post_nothing() {
        let global = PostOptions::defaults("hive");
        for handler in [
            Handler::new("none").reply(|_| Option::<String>::None),
            Handler::new("empty").reply(|_| ""),
            Handler::new("unit").reply(|_| ()),
            Handler::new("null").reply(|_| Value::Null),
            Handler::new("no-action"),
        ] {
            let post = assert_ok!(handler.act(event("x"), &global).await);
            assert!(post.is_none(), "{} should be silent", handler.get_name());
        }
    }

    #[tokio::test]
    async fn test_structured_reply_layering() {
        let global = PostOptions::defaults("hive");
        let handler = Handler::new("fancy")
            .username("fancy-bot")
            .icon_emoji(":sparkles:")
            .reply(|_| json!({"text": "hi", "icon_emoji": ":wave:"}));

        let post = assert_ok!(handler.act(event("x"), &global).await).unwrap();
        assert_eq!(post["username"], "fancy-bot");
        assert_eq!(post["icon_emoji"], ":wave:");
        assert_eq!(post["parse"], "none");
        assert_eq!(post["text"], "hi");
    }

    #[tokio::test]
    async fn test_action_error_is_returned() {
        let handler = Handler::new("broken")
            .phrase("x")
            .action(|_| async { Err(HandlerError::custom("backend down")) });
        let err = assert_err!(handler.act(event("x"), &PostOptions::new()).await);
        assert_eq!(err.to_string(), "backend down");
    }

    #[test]
    fn test_builder_copy_on_write() {
        let base = Handler::new("base").phrase("a");
        let extended = base.clone().phrase("b").concurrency(0);
        assert_eq!(base.condition_count(), 1);
        assert_eq!(extended.condition_count(), 2);
        assert_eq!(extended.get_concurrency(), Some(1));
        assert_eq!(base.get_concurrency(), None);
    }
}

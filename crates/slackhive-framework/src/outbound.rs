//! Outbound delivery.
//!
//! Handler replies arrive on the dispatcher's outbound queue tagged with the
//! transport they prefer. [`Delivery`] drains that queue in order: web API
//! posts are retried with bounded backoff and then dropped with an error
//! log; stream sends go through the connection's sequence-numbered queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use slackhive_core::payload::stream_message;
use slackhive_core::{Payload, RetryConfig, Route, StreamSender, WebApi};

use crate::dispatcher::HandlerId;

/// A reply ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// The handler that produced it.
    pub handler: HandlerId,
    /// Preferred transport.
    pub route: Route,
    /// The merged post, including `channel`.
    pub payload: Payload,
}

/// Retry policy for web API posts.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Retries after the first attempt.
    pub post_retries: u32,
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            post_retries: 3,
            retry: RetryConfig::default(),
        }
    }
}

/// Drains the outbound queue onto the transports.
pub struct Delivery {
    api: Arc<dyn WebApi>,
    stream: Option<Arc<dyn StreamSender>>,
    config: DeliveryConfig,
    shutdown: CancellationToken,
}

impl Delivery {
    pub fn new(api: Arc<dyn WebApi>, config: DeliveryConfig) -> Self {
        Self {
            api,
            stream: None,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Enables the streaming route.
    pub fn with_stream(mut self, stream: Arc<dyn StreamSender>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Delivers messages in queue order until the queue closes or
    /// `shutdown` fires. A post waiting out a retry delay is dropped on
    /// shutdown.
    pub async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: CancellationToken,
    ) {
        self.shutdown = shutdown.clone();
        info!("Delivery loop started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            self.deliver(message).await;
        }
        info!("Delivery loop stopped");
    }

    /// Delivers one message. Returns false if it was dropped.
    pub async fn deliver(&self, message: OutboundMessage) -> bool {
        match (message.route, &self.stream) {
            (Route::Stream, Some(stream)) => {
                match stream.send(stream_message(&message.payload)) {
                    Ok(seq) => {
                        debug!(handler_id = %message.handler, seq, "Reply queued on stream");
                        true
                    }
                    Err(e) => {
                        error!(handler_id = %message.handler, error = %e, "Stream send failed, reply dropped");
                        false
                    }
                }
            }
            (Route::Stream, None) => {
                warn!(handler_id = %message.handler, "No stream available, posting over web API");
                self.post(message.handler, &message.payload).await
            }
            (Route::WebApi, _) => self.post(message.handler, &message.payload).await,
        }
    }

    async fn post(&self, handler: HandlerId, payload: &Payload) -> bool {
        let mut delay = self.config.retry.initial_delay;
        let mut attempt = 0u32;

        loop {
            match self.api.post_message(payload).await {
                Ok(_) => {
                    debug!(handler_id = %handler, attempt, "Reply posted");
                    return true;
                }
                Err(e) if e.is_retryable() && attempt < self.config.post_retries => {
                    attempt += 1;
                    warn!(handler_id = %handler, error = %e, attempt, delay = ?delay, "Post failed, retrying");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            debug!(handler_id = %handler, "Shutting down, reply dropped");
                            return false;
                        }
                        _ = sleep(delay) => {}
                    }
                    delay = self.config.retry.next_delay(delay);
                }
                Err(e) => {
                    error!(handler_id = %handler, error = %e, attempts = attempt + 1, "Post failed, reply dropped");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, FakeStream};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fast() -> DeliveryConfig {
        DeliveryConfig {
            post_retries: 2,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_retries: None,
            },
        }
    }

    fn message(route: Route, text: &str) -> OutboundMessage {
        let mut payload = slackhive_core::text_payload(text);
        payload.insert("channel".into(), json!("C1"));
        payload.insert("icon_emoji".into(), json!(":squirrel:"));
        OutboundMessage {
            handler: HandlerId::from_raw(1),
            route,
            payload,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let api = Arc::new(FakeApi::new());
        api.failing_posts.store(2, Ordering::SeqCst);
        let delivery = Delivery::new(api.clone(), fast());

        assert!(delivery.deliver(message(Route::WebApi, "hi")).await);
        assert_eq!(api.post_attempts.load(Ordering::SeqCst), 3);
        assert_eq!(api.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let api = Arc::new(FakeApi::new());
        api.failing_posts.store(10, Ordering::SeqCst);
        let delivery = Delivery::new(api.clone(), fast());

        assert!(!delivery.deliver(message(Route::WebApi, "hi")).await);
        assert_eq!(api.post_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let api = Arc::new(FakeApi::new());
        api.reject_posts.store(true, Ordering::SeqCst);
        let delivery = Delivery::new(api.clone(), fast());

        assert!(!delivery.deliver(message(Route::WebApi, "hi")).await);
        assert_eq!(api.post_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_route_strips_decorations() {
        let api = Arc::new(FakeApi::new());
        let stream = Arc::new(FakeStream::default());
        let delivery = Delivery::new(api.clone(), fast()).with_stream(stream.clone());

        assert!(delivery.deliver(message(Route::Stream, "hi")).await);
        let sent = stream.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "message");
        assert_eq!(sent[0]["text"], "hi");
        assert!(sent[0].get("icon_emoji").is_none());
        assert!(api.posted().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_delay() {
        let api = Arc::new(FakeApi::new());
        api.failing_posts.store(10, Ordering::SeqCst);
        let config = DeliveryConfig {
            post_retries: 3,
            retry: RetryConfig {
                initial_delay: Duration::from_secs(60),
                ..Default::default()
            },
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(message(Route::WebApi, "hi")).unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Delivery::new(api.clone(), config).run(rx, shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while api.post_attempts.load(Ordering::SeqCst) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("delivery kept sleeping after shutdown")
            .unwrap();
        assert_eq!(api.post_attempts.load(Ordering::SeqCst), 1);
        assert!(api.posted().is_empty());
    }

    #[tokio::test]
    async fn test_run_preserves_queue_order() {
        let api = Arc::new(FakeApi::new());
        let (tx, rx) = mpsc::unbounded_channel();
        for text in ["one", "two", "three"] {
            tx.send(message(Route::WebApi, text)).unwrap();
        }
        drop(tx);

        Delivery::new(api.clone(), fast())
            .run(rx, CancellationToken::new())
            .await;

        let texts: Vec<_> = api
            .posted()
            .iter()
            .map(|p| p["text"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }
}

//! Streaming connection manager.
//!
//! [`StreamConnection`] keeps one logical WebSocket session to the service
//! alive and hides reconnects from its callers:
//!
//! ```text
//! closed ──start──▶ connecting ──handshake──▶ initializing ──hello──▶ open
//!   ▲                                                                  │
//!   └──────────────── close frame / transport error ───────────────────┘
//! ```
//!
//! Two background tasks run per connection. The receive loop owns the read
//! half of the socket, intercepts control frames, drives keepalive and
//! reconnects. The sender loop drains the outbound queue strictly in order
//! and holds the head frame while the session is not open, so nothing is
//! dropped or reordered across a reconnect.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use slackhive_core::codec::{self, Frame};
use slackhive_core::{
    InboundEvent, Payload, StreamConfig, StreamSender, TransportError, TransportResult,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Lifecycle state of the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Closed,
    Connecting,
    Initializing,
    Open,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        *self == Self::Open
    }
}

/// Connection events a callback can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Open,
    Close,
    Error,
    Message,
}

impl FromStr for ConnectionEvent {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "error" => Ok(Self::Error),
            "message" => Ok(Self::Message),
            other => Err(TransportError::UnknownEventType(other.to_string())),
        }
    }
}

/// What a bound callback receives.
#[derive(Debug, Clone)]
pub enum Signal {
    /// Transport handshake completed; the session is initializing.
    Open,
    /// The session ended.
    Close,
    /// A transport-level failure.
    Error(TransportError),
    /// A decoded, non-control frame.
    Message(InboundEvent),
}

/// A bound connection callback.
pub type Callback = Arc<dyn Fn(Signal) + Send + Sync>;

/// Sequence allocation and enqueue happen under one lock so ids are
/// monotonic in queue order.
struct Outbound {
    next_id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Why a session ended.
enum SessionEnd {
    Shutdown,
    Closed(String),
    Failed(TransportError),
}

struct Shared {
    config: StreamConfig,
    url: RwLock<String>,
    status: watch::Sender<ConnectionStatus>,
    callbacks: RwLock<HashMap<ConnectionEvent, Callback>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    outbound: Mutex<Outbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            trace!(from = ?previous, to = ?status, "Connection status changed");
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn emit(&self, event: ConnectionEvent, signal: Signal) {
        let callback = self.callbacks.read().get(&event).cloned();
        if let Some(callback) = callback {
            callback(signal);
        }
    }

    /// Writes a control frame to whatever socket is current.
    async fn write(&self, message: Message) -> TransportResult<()> {
        let mut guard = self.sink.lock().await;
        send_on(guard.as_mut(), message).await
    }

    /// Writes an application frame. The status is checked while the sink is
    /// locked, so the frame cannot land on a newer session still awaiting
    /// hello.
    async fn write_open(&self, message: Message) -> TransportResult<()> {
        let mut guard = self.sink.lock().await;
        if !self.status().is_open() {
            return Err(TransportError::ConnectionClosed {
                reason: "session not open".into(),
            });
        }
        send_on(guard.as_mut(), message).await
    }

    async fn release_socket(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    /// Handles one inbound data frame. Returns true if it opened the session.
    fn handle_frame(&self, data: &[u8]) -> bool {
        match codec::decode_frame(data) {
            Ok(Frame::Hello) => {
                if self.status() == ConnectionStatus::Initializing {
                    self.set_status(ConnectionStatus::Open);
                    info!(url = %self.url.read(), "Streaming session open");
                    return true;
                }
                debug!("Ignoring hello outside of initialization");
                false
            }
            Ok(Frame::ReconnectUrl(url)) => {
                debug!(url = %url, "Endpoint updated for next reconnect");
                *self.url.write() = url;
                false
            }
            Ok(Frame::Ack { reply_to, ok }) => {
                if ok {
                    trace!(seq = reply_to, "Payload acknowledged");
                } else {
                    warn!(seq = reply_to, "Payload rejected by service");
                }
                false
            }
            Ok(Frame::Event(event)) => {
                trace!(event_type = %event.kind(), "Received event");
                self.emit(ConnectionEvent::Message, Signal::Message(event));
                false
            }
            Err(e) => {
                warn!(error = %e, len = data.len(), "Dropping undecodable frame");
                false
            }
        }
    }
}

async fn send_on(sink: Option<&mut WsSink>, message: Message) -> TransportResult<()> {
    match sink {
        Some(sink) => sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string())),
        None => Err(TransportError::ConnectionClosed {
            reason: "no active socket".into(),
        }),
    }
}

/// A self-healing streaming connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct StreamConnection {
    shared: Arc<Shared>,
}

impl StreamConnection {
    /// Creates a closed connection; nothing happens until [`start`](Self::start).
    ///
    /// Payloads may be queued with [`send`](Self::send) before starting; they
    /// go out once the first session opens.
    pub fn new(config: StreamConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Closed);

        Self {
            shared: Arc::new(Shared {
                url: RwLock::new(config.url.clone()),
                config,
                status,
                callbacks: RwLock::new(HashMap::new()),
                sink: tokio::sync::Mutex::new(None),
                outbound: Mutex::new(Outbound { next_id: 0, tx }),
                outbound_rx: Mutex::new(Some(rx)),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Binds the callback for `event`, replacing any previous one.
    pub fn bind<F>(&self, event: ConnectionEvent, callback: F)
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .write()
            .insert(event, Arc::new(callback));
    }

    /// Binds by event name (`open`, `close`, `error` or `message`).
    pub fn bind_named<F>(&self, event: &str, callback: F) -> TransportResult<()>
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        let event = event.parse()?;
        self.bind(event, callback);
        Ok(())
    }

    /// Launches the receive and sender loops.
    ///
    /// When the config carries an open-wait timeout this blocks until the
    /// session is open, returning [`TransportError::OpenTimeout`] otherwise.
    pub async fn start(&self) -> TransportResult<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::ConnectionClosed {
                reason: "connection was closed".into(),
            });
        }
        let Some(outbound_rx) = self.shared.outbound_rx.lock().take() else {
            return Err(TransportError::InvalidConfig(
                "connection already started".into(),
            ));
        };

        let receive = tokio::spawn(receive_loop(Arc::clone(&self.shared)));
        let send = tokio::spawn(sender_loop(Arc::clone(&self.shared), outbound_rx));
        self.shared.tasks.lock().extend([receive, send]);

        if let Some(wait) = self.shared.config.open_wait_timeout {
            self.wait_for_open(wait).await?;
        }
        Ok(())
    }

    /// Waits until the session is open.
    pub async fn wait_for_open(&self, wait: Duration) -> TransportResult<()> {
        let mut status = self.shared.status.subscribe();
        match timeout(wait, status.wait_for(ConnectionStatus::is_open)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed {
                reason: "connection dropped while waiting for open".into(),
            }),
            Err(_) => Err(TransportError::OpenTimeout(wait)),
        }
    }

    /// Queues a payload for in-order delivery and returns its sequence id.
    ///
    /// Returns immediately; the payload is held while the session is not
    /// open.
    pub fn send(&self, mut payload: Payload) -> TransportResult<u64> {
        let mut outbound = self.shared.outbound.lock();
        let id = outbound.next_id + 1;
        payload.insert("id".into(), id.into());
        let frame = codec::encode(&payload)?;
        outbound
            .tx
            .send(frame)
            .map_err(|_| TransportError::SendFailed("connection is closed".into()))?;
        outbound.next_id = id;
        trace!(seq = id, "Queued outbound payload");
        Ok(id)
    }

    /// Stops both loops and releases the socket. Idempotent.
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        self.shared.outbound_rx.lock().take();

        let tasks: Vec<_> = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.shared.release_socket().await;
        self.shared.set_status(ConnectionStatus::Closed);
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// The endpoint the next connection attempt will use.
    pub fn url(&self) -> String {
        self.shared.url.read().clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl StreamSender for StreamConnection {
    fn send(&self, payload: Payload) -> TransportResult<u64> {
        StreamConnection::send(self, payload)
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &*self.shared.url.read())
            .field("status", &self.status())
            .finish()
    }
}

/// Connects, runs sessions and reconnects until shut down.
async fn receive_loop(shared: Arc<Shared>) {
    let retry = shared.config.retry.clone();
    let mut delay = Duration::ZERO;
    let mut failures = 0u32;

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let url = shared.url.read().clone();
        shared.set_status(ConnectionStatus::Connecting);
        debug!(url = %url, "Connecting to streaming endpoint");

        let limit = shared.config.connect_timeout;
        let connected = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            result = timeout(limit, connect_async(url.as_str())) => match result {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("handshake not completed within {limit:?}")),
            },
        };

        let reached_open = match connected {
            Ok(stream) => run_session(&shared, stream).await,
            Err(reason) => {
                warn!(url = %url, error = %reason, "Connection attempt failed");
                let err = TransportError::ConnectionFailed {
                    url: url.clone(),
                    reason,
                };
                shared.set_status(ConnectionStatus::Closed);
                shared.emit(ConnectionEvent::Error, Signal::Error(err));
                false
            }
        };

        if reached_open {
            failures = 0;
            delay = Duration::ZERO;
        } else {
            failures += 1;
            delay = if delay.is_zero() {
                retry.initial_delay
            } else {
                retry.next_delay(delay)
            };
        }

        if !shared.config.auto_reconnect || shared.shutdown.is_cancelled() {
            break;
        }
        if !retry.allows(failures) {
            error!(attempts = failures, "Max retries reached, giving up");
            break;
        }

        if !delay.is_zero() {
            warn!(delay = ?delay, attempts = failures, "Reconnecting...");
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        } else {
            info!("Reconnecting");
        }
    }

    shared.set_status(ConnectionStatus::Closed);
    debug!("Receive loop stopped");
}

/// Runs one session over an established socket. Returns true if the session
/// reached `open`.
async fn run_session(shared: &Shared, stream: WsStream) -> bool {
    let (sink, mut source) = stream.split();
    *shared.sink.lock().await = Some(sink);
    shared.set_status(ConnectionStatus::Initializing);
    debug!("Transport handshake complete, awaiting hello");
    shared.emit(ConnectionEvent::Open, Signal::Open);

    let mut reached_open = false;
    let mut last_activity = Instant::now();
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break SessionEnd::Shutdown,

            _ = ticker.tick() => {
                if last_activity.elapsed() > shared.config.keepalive_threshold {
                    trace!("Idle past keepalive threshold, sending ping");
                    if let Err(e) = shared.write(Message::Ping(Default::default())).await {
                        break SessionEnd::Failed(e);
                    }
                    last_activity = Instant::now();
                }
            }

            msg = source.next() => {
                let message = match msg {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        break SessionEnd::Failed(TransportError::ConnectionClosed {
                            reason: e.to_string(),
                        });
                    }
                    None => break SessionEnd::Closed("stream ended".into()),
                };
                last_activity = Instant::now();

                match message {
                    Message::Text(text) => {
                        reached_open |= shared.handle_frame(text.as_bytes());
                    }
                    Message::Binary(data) => {
                        reached_open |= shared.handle_frame(&data);
                    }
                    Message::Ping(data) => {
                        trace!("Received ping, sending pong");
                        if let Err(e) = shared.write(Message::Pong(data)).await {
                            break SessionEnd::Failed(e);
                        }
                    }
                    Message::Pong(_) => trace!("Received pong"),
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed connection".into());
                        break SessionEnd::Closed(reason);
                    }
                    Message::Frame(_) => {}
                }
            }
        }
    };

    shared.release_socket().await;
    shared.set_status(ConnectionStatus::Closed);

    match end {
        SessionEnd::Shutdown => debug!("Session closed by owner"),
        SessionEnd::Closed(reason) => info!(reason = %reason, "Session closed"),
        SessionEnd::Failed(err) => {
            warn!(error = %err, "Session failed");
            shared.emit(ConnectionEvent::Error, Signal::Error(err));
        }
    }
    shared.emit(ConnectionEvent::Close, Signal::Close);

    reached_open
}

/// Drains the outbound queue in FIFO order, one frame at a time.
async fn sender_loop(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<String>) {
    let mut status = shared.status.subscribe();
    let mut pending: Option<String> = None;

    loop {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            },
        };

        let opened = tokio::select! {
            _ = shared.shutdown.cancelled() => false,
            result = status.wait_for(ConnectionStatus::is_open) => result.is_ok(),
        };
        if !opened {
            break;
        }

        match shared.write_open(Message::Text(frame.clone().into())).await {
            Ok(()) => trace!(len = frame.len(), "Sent frame"),
            Err(e) => {
                warn!(error = %e, "Send failed, holding frame until the session reopens");
                pending = Some(frame);
                let stopped = tokio::select! {
                    _ = shared.shutdown.cancelled() => true,
                    result = status.wait_for(|s| !s.is_open()) => result.is_err(),
                };
                if stopped {
                    break;
                }
            }
        }
    }

    debug!("Sender loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    type ServerStream = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerStream {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn push(server: &mut ServerStream, frame: &str) {
        server.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    async fn next_json(server: &mut ServerStream) -> Value {
        loop {
            let msg = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn wait_status(conn: &StreamConnection, want: ConnectionStatus) {
        let mut status = conn.watch_status();
        timeout(WAIT, status.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
    }

    fn config(url: &str) -> StreamConfig {
        StreamConfig::new(url)
            .with_open_wait(None)
            .with_retry(slackhive_core::RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
                max_retries: None,
            })
    }

    fn collect_messages(conn: &StreamConnection) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        conn.bind(ConnectionEvent::Message, move |signal| {
            if let Signal::Message(event) = signal {
                let _ = tx.send(event);
            }
        });
        rx
    }

    fn numbered(n: u64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("type".into(), json!("message"));
        payload.insert("n".into(), json!(n));
        payload
    }

    #[tokio::test]
    async fn test_hello_opens_without_forwarding() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));
        let mut events = collect_messages(&conn);

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        wait_status(&conn, ConnectionStatus::Initializing).await;

        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        push(&mut server, r#"{"type":"message","text":"first real event"}"#).await;
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.text(), Some("first real event"));

        conn.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_url_updates_endpoint_in_place() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));
        let mut events = collect_messages(&conn);

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        push(&mut server, r#"{"type":"reconnect_url","url":"wss://x"}"#).await;
        push(&mut server, r#"{"type":"message","text":"marker"}"#).await;

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.text(), Some("marker"));
        assert_eq!(conn.url(), "wss://x");
        assert_eq!(conn.status(), ConnectionStatus::Open);
        assert!(events.try_recv().is_err());

        conn.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_uses_pushed_endpoint() {
        let (first_listener, first_url) = listen().await;
        let (second_listener, second_url) = listen().await;
        let conn = StreamConnection::new(config(&first_url));
        let mut events = collect_messages(&conn);

        conn.start().await.unwrap();
        let mut first = accept(&first_listener).await;
        push(&mut first, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        let update = json!({"type": "reconnect_url", "url": &second_url}).to_string();
        push(&mut first, &update).await;
        push(&mut first, r#"{"type":"message","text":"marker"}"#).await;
        timeout(WAIT, events.recv()).await.unwrap().unwrap();

        drop(first);
        let mut second = accept(&second_listener).await;
        wait_status(&conn, ConnectionStatus::Initializing).await;
        push(&mut second, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        assert!(
            timeout(Duration::from_millis(100), first_listener.accept())
                .await
                .is_err()
        );
        assert_eq!(conn.url(), second_url);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_retried() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(
            config(&url).with_connect_timeout(Duration::from_millis(100)),
        );
        let (tx, mut errors) = mpsc::unbounded_channel();
        conn.bind(ConnectionEvent::Error, move |signal| {
            if let Signal::Error(err) = signal {
                let _ = tx.send(err);
            }
        });

        conn.start().await.unwrap();
        // Accept the TCP connection but never answer the upgrade.
        let (_stalled, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

        let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }));

        let mut server = accept(&listener).await;
        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        conn.close().await;
    }

    #[tokio::test]
    async fn test_application_frames_wait_for_hello() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        wait_status(&conn, ConnectionStatus::Initializing).await;

        let early = conn
            .shared
            .write_open(Message::Text(r#"{"early":true}"#.into()))
            .await;
        assert!(matches!(early, Err(TransportError::ConnectionClosed { .. })));

        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;
        conn.send(numbered(7)).unwrap();

        let frame = next_json(&mut server).await;
        assert_eq!(frame["n"], 7);
        assert!(frame.get("early").is_none());

        conn.close().await;
    }

    #[tokio::test]
    async fn test_sends_before_open_arrive_in_order() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));

        let ids: Vec<u64> = (0..5).map(|n| conn.send(numbered(n)).unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        wait_status(&conn, ConnectionStatus::Initializing).await;

        // Nothing may go out before hello.
        assert!(
            timeout(Duration::from_millis(100), server.next())
                .await
                .is_err()
        );

        push(&mut server, r#"{"type":"hello"}"#).await;
        for n in 0..5u64 {
            let frame = next_json(&mut server).await;
            assert_eq!(frame["n"], n);
            assert_eq!(frame["id"], n + 1);
        }

        conn.close().await;
    }

    #[tokio::test]
    async fn test_payload_held_across_reconnect() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        conn.bind(ConnectionEvent::Open, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.start().await.unwrap();
        let mut first = accept(&listener).await;
        push(&mut first, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        drop(first);
        let mut status = conn.watch_status();
        timeout(WAIT, status.wait_for(|s| !s.is_open()))
            .await
            .unwrap()
            .unwrap();

        let id = conn.send(numbered(42)).unwrap();

        let mut second = accept(&listener).await;
        push(&mut second, r#"{"type":"hello"}"#).await;
        let frame = next_json(&mut second).await;
        assert_eq!(frame["n"], 42);
        assert_eq!(frame["id"], id);
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_bad_frame_is_dropped() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(config(&url));
        let mut events = collect_messages(&conn);

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        push(&mut server, "{not json").await;
        push(&mut server, r#"{"no_type":true}"#).await;
        push(&mut server, r#"{"type":"message","text":"after"}"#).await;

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.text(), Some("after"));
        assert_eq!(conn.status(), ConnectionStatus::Open);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_keepalive_pings_when_idle() {
        let (listener, url) = listen().await;
        let conn = StreamConnection::new(
            config(&url).with_keepalive(Duration::from_millis(50)),
        );

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        push(&mut server, r#"{"type":"hello"}"#).await;

        let pinged = timeout(WAIT, async {
            while let Some(Ok(msg)) = server.next().await {
                if matches!(msg, Message::Ping(_)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(pinged);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_open_wait_times_out() {
        let (_listener, url) = listen().await;
        let conn = StreamConnection::new(
            config(&url).with_open_wait(Some(Duration::from_millis(200))),
        );

        let result = conn.start().await;
        assert!(matches!(result, Err(TransportError::OpenTimeout(_))));

        conn.close().await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_no_reconnect_stays_closed() {
        let (listener, url) = listen().await;
        let mut cfg = config(&url);
        cfg.auto_reconnect = false;
        let conn = StreamConnection::new(cfg);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        conn.bind(ConnectionEvent::Close, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.start().await.unwrap();
        let mut server = accept(&listener).await;
        push(&mut server, r#"{"type":"hello"}"#).await;
        wait_status(&conn, ConnectionStatus::Open).await;

        server.close(None).await.unwrap();
        wait_status(&conn, ConnectionStatus::Closed).await;

        assert!(
            timeout(Duration::from_millis(100), listener.accept())
                .await
                .is_err()
        );
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_bind_rejects_unknown_event() {
        let conn = StreamConnection::new(StreamConfig::new("ws://127.0.0.1:9"));
        assert!(conn.bind_named("message", |_| {}).is_ok());
        assert!(matches!(
            conn.bind_named("typing", |_| {}),
            Err(TransportError::UnknownEventType(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = StreamConnection::new(StreamConfig::new("ws://127.0.0.1:9"));
        conn.close().await;
        conn.close().await;

        assert!(conn.is_closed());
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert!(conn.send(numbered(1)).is_err());
        assert!(conn.start().await.is_err());
    }
}

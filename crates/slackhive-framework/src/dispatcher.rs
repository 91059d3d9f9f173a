//! The dispatch engine.
//!
//! The [`Dispatcher`] owns the handler table, the channel/user directories
//! and the inbound queue. Its run loop is a single cooperative coordinator:
//!
//! 1. Start backlogged work for handlers that are below their own ceiling.
//!    Then, if a worker slot is free, pop the next inbound event.
//! 2. Rebuild the user or channel directory if the event type calls for it.
//! 3. Drop anything that is not a plain message, is an ignored subtype, was
//!    authored by the bot itself, or comes from an unsubscribed channel.
//! 4. Enrich the event with channel and user names.
//! 5. Spawn one worker per registered handler, within the global and
//!    per-handler ceilings. Workers evaluate, act and queue the reply.
//! 6. Reap finished workers every tick.
//!
//! When the global ceiling stops the fan-out part way, the event stays at the
//! front of the queue with the handlers it still owes, and the loop retries on
//! the next tick. Later events wait behind it.
//!
//! A handler at its own `concurrency` ceiling does not hold the event. The
//! event goes to that handler's backlog instead, a FIFO drained as its
//! workers finish, and the fan-out moves on to the other handlers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use slackhive_core::payload::DEFAULT_BOT_NAME;
use slackhive_core::{ApiResult, EnrichedEvent, InboundEvent, PostOptions, ReplyTo, WebApi};

use crate::directory::{ChannelCriterion, Directories};
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::handler::Handler;
use crate::outbound::OutboundMessage;

/// Event types that trigger a user directory rebuild.
pub const USER_REFRESH_TYPES: &[&str] = &["channel_join", "channel_leave", "team_join", "user_change"];

/// Event types that trigger a channel directory rebuild.
pub const CHANNEL_REFRESH_TYPES: &[&str] = &[
    "channel_archive",
    "channel_created",
    "channel_deleted",
    "channel_rename",
    "channel_unarchive",
];

// ============================================================================
// Handler ids
// ============================================================================

/// Identifies a registered handler. Never reused within a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Config
// ============================================================================

/// Dispatch engine settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Global ceiling on concurrently running workers.
    pub max_workers: usize,
    /// Sleep between polls when idle or throttled.
    pub tick: Duration,
    /// Message subtypes that are never dispatched.
    pub ignored_subtypes: Vec<String>,
    pub user_refresh_types: Vec<String>,
    pub channel_refresh_types: Vec<String>,
    /// Global post defaults, the lowest layer of every reply.
    pub post_defaults: PostOptions,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 50,
            tick: Duration::from_millis(1),
            ignored_subtypes: vec!["bot_message".into()],
            user_refresh_types: USER_REFRESH_TYPES.iter().map(|s| s.to_string()).collect(),
            channel_refresh_types: CHANNEL_REFRESH_TYPES.iter().map(|s| s.to_string()).collect(),
            post_defaults: PostOptions::defaults(DEFAULT_BOT_NAME),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_post_defaults(mut self, post: PostOptions) -> Self {
        self.post_defaults = post;
        self
    }
}

// ============================================================================
// Worker bookkeeping
// ============================================================================

/// An enriched event and the handlers it has not been dispatched to yet.
struct PendingDispatch {
    event: EnrichedEvent,
    remaining: VecDeque<HandlerId>,
}

/// Events owed to handlers that were at their own ceiling, oldest first.
type Backlog = BTreeMap<HandlerId, VecDeque<EnrichedEvent>>;

/// Live worker tasks, owned by the run loop.
#[derive(Default)]
struct Workers {
    tasks: Vec<(HandlerId, JoinHandle<()>)>,
    per_handler: HashMap<HandlerId, usize>,
}

impl Workers {
    fn active(&self) -> usize {
        self.tasks.len()
    }

    fn running(&self, id: HandlerId) -> usize {
        self.per_handler.get(&id).copied().unwrap_or(0)
    }

    fn spawn<F>(&mut self, id: HandlerId, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((id, tokio::spawn(work)));
        *self.per_handler.entry(id).or_default() += 1;
    }

    /// Discards finished workers. Returns how many were reaped.
    fn reap(&mut self) -> usize {
        let before = self.tasks.len();
        let per_handler = &mut self.per_handler;
        self.tasks.retain(|(id, task)| {
            if !task.is_finished() {
                return true;
            }
            if let Some(count) = per_handler.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    per_handler.remove(id);
                }
            }
            false
        });
        before - self.tasks.len()
    }

    fn abort_all(&mut self) {
        for (_, task) in self.tasks.drain(..) {
            task.abort();
        }
        self.per_handler.clear();
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct DispatcherInner {
    config: DispatchConfig,
    api: Arc<dyn WebApi>,
    directories: Directories,
    handlers: RwLock<Arc<BTreeMap<HandlerId, Handler>>>,
    next_id: AtomicU64,
    self_id: RwLock<Option<String>>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
    active_workers: AtomicUsize,
}

/// Fans inbound events out to registered handlers.
///
/// Cloning yields another handle to the same engine, so handlers can be
/// registered while [`run`](Self::run) is looping.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn WebApi>, config: DispatchConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(DispatcherInner {
                config,
                api,
                directories: Directories::new(),
                handlers: RwLock::new(Arc::new(BTreeMap::new())),
                next_id: AtomicU64::new(1),
                self_id: RwLock::new(None),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                active_workers: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Adds a handler and returns its id.
    pub fn register(&self, handler: Handler) -> HandlerId {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        info!(handler_id = %id, handler = %handler.get_name(), "Registered handler");
        let mut table = self.inner.handlers.write();
        Arc::make_mut(&mut table).insert(id, handler);
        id
    }

    /// Adds several handlers, returning their ids in order.
    pub fn register_all(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<HandlerId> {
        handlers.into_iter().map(|h| self.register(h)).collect()
    }

    /// Removes a handler. Workers already running for it finish normally.
    pub fn deregister(&self, id: HandlerId) -> bool {
        let mut table = self.inner.handlers.write();
        let removed = Arc::make_mut(&mut table).remove(&id);
        match &removed {
            Some(handler) => {
                info!(handler_id = %id, handler = %handler.get_name(), "Deregistered handler")
            }
            None => debug!(handler_id = %id, "Deregister of unknown handler"),
        }
        removed.is_some()
    }

    pub fn handler(&self, id: HandlerId) -> Option<Handler> {
        self.inner.handlers.read().get(&id).cloned()
    }

    pub fn handler_ids(&self) -> Vec<HandlerId> {
        self.inner.handlers.read().keys().copied().collect()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    // ------------------------------------------------------------------------
    // Identity and directories
    // ------------------------------------------------------------------------

    /// Records the bot's own user id; its messages are never dispatched.
    pub fn set_self_id(&self, id: Option<String>) {
        *self.inner.self_id.write() = id;
    }

    pub fn self_id(&self) -> Option<String> {
        self.inner.self_id.read().clone()
    }

    /// Replaces the channel subscription criteria and rebuilds the channel
    /// directory.
    pub async fn set_channel_criteria(&self, criteria: Vec<ChannelCriterion>) -> ApiResult<usize> {
        self.inner.directories.set_criteria(criteria);
        self.inner
            .directories
            .refresh_channels(self.inner.api.as_ref())
            .await
    }

    /// Loads both directories. Any failure is returned.
    pub async fn prime(&self) -> DispatchResult<()> {
        let api = self.inner.api.as_ref();
        let channels = self
            .inner
            .directories
            .refresh_channels(api)
            .await
            .map_err(|source| DispatchError::Prime {
                directory: "channels",
                source,
            })?;
        let users = self
            .inner
            .directories
            .refresh_users(api)
            .await
            .map_err(|source| DispatchError::Prime {
                directory: "users",
                source,
            })?;
        info!(channels, users, "Directories loaded");
        Ok(())
    }

    pub fn directories(&self) -> &Directories {
        &self.inner.directories
    }

    /// Names of the channels the bot is subscribed to.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.inner.directories.subscribed_channels()
    }

    /// Names of every channel visible to the token, queried live.
    pub async fn available_channels(&self) -> ApiResult<Vec<String>> {
        let mut names: Vec<_> = self
            .inner
            .api
            .list_channels()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Names of known users.
    pub fn users(&self) -> Vec<String> {
        self.inner.directories.user_names()
    }

    // ------------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------------

    /// A sender for the inbound queue, for the connection's message callback.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundEvent> {
        self.inner.inbound_tx.clone()
    }

    /// Appends an event to the inbound queue.
    pub fn enqueue(&self, event: InboundEvent) {
        let _ = self.inner.inbound_tx.send(event);
    }

    /// Takes the receiving end of the outbound queue. Returns `None` after
    /// the first call.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.inner.outbound_rx.lock().take()
    }

    /// Workers alive as of the last tick.
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------------

    /// Runs the dispatch loop until `shutdown` fires.
    ///
    /// Workers still running at shutdown are aborted.
    pub async fn run(&self, shutdown: CancellationToken) -> DispatchResult<()> {
        let Some(mut inbound) = self.inner.inbound_rx.lock().take() else {
            return Err(DispatchError::AlreadyRunning);
        };
        info!(
            max_workers = self.inner.config.max_workers,
            handlers = self.handler_count(),
            "Dispatcher started"
        );

        let mut pending: Option<PendingDispatch> = None;
        let mut backlog = Backlog::new();
        let mut workers = Workers::default();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let reaped = workers.reap();
            if reaped > 0 {
                trace!(reaped, active = workers.active(), "Reaped workers");
            }

            let progressed = self
                .step(&mut inbound, &mut pending, &mut backlog, &mut workers)
                .await;
            self.inner
                .active_workers
                .store(workers.active(), Ordering::Relaxed);

            if progressed {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.inner.config.tick) => {}
                }
            }
        }

        if let Some(dropped) = pending.take() {
            debug!(
                event_type = %dropped.event.kind(),
                undispatched = dropped.remaining.len(),
                "Dropping partially dispatched event"
            );
        }
        let backlogged: usize = backlog.values().map(VecDeque::len).sum();
        if backlogged > 0 {
            debug!(backlogged, "Dropping backlogged dispatches");
        }
        let abandoned = workers.active();
        workers.abort_all();
        self.inner.active_workers.store(0, Ordering::Relaxed);
        if abandoned > 0 {
            warn!(abandoned, "Aborted in-flight workers at shutdown");
        }

        *self.inner.inbound_rx.lock() = Some(inbound);
        info!("Dispatcher stopped");
        Ok(())
    }

    /// One coordinator step. Returns true if any work was done.
    async fn step(
        &self,
        inbound: &mut mpsc::UnboundedReceiver<InboundEvent>,
        pending: &mut Option<PendingDispatch>,
        backlog: &mut Backlog,
        workers: &mut Workers,
    ) -> bool {
        let max_workers = self.inner.config.max_workers;
        let drained = self.drain_backlog(backlog, workers);

        let mut current = match pending.take() {
            Some(held) => held,
            None => {
                if workers.active() >= max_workers {
                    return drained;
                }
                let Ok(event) = inbound.try_recv() else {
                    return drained;
                };
                match self.prepare(event).await {
                    Some(ready) => ready,
                    None => return true,
                }
            }
        };

        let handlers = Arc::clone(&self.inner.handlers.read());
        let mut held = VecDeque::new();
        let mut launched = 0usize;
        let mut deferred = 0usize;

        while let Some(id) = current.remaining.pop_front() {
            let Some(handler) = handlers.get(&id) else {
                continue;
            };
            if workers.active() >= max_workers {
                held.push_back(id);
                held.append(&mut current.remaining);
                break;
            }
            // Anything already backlogged for this handler goes first.
            if let Some(limit) = handler.get_concurrency()
                && (backlog.contains_key(&id) || workers.running(id) >= limit)
            {
                backlog
                    .entry(id)
                    .or_default()
                    .push_back(current.event.clone());
                deferred += 1;
                continue;
            }

            let work = run_worker(
                Arc::clone(&self.inner),
                id,
                handler.clone(),
                current.event.clone(),
            );
            workers.spawn(id, work);
            launched += 1;
        }

        if deferred > 0 {
            trace!(
                event_type = %current.event.kind(),
                deferred,
                "Handlers at their ceiling, event backlogged"
            );
        }
        if held.is_empty() {
            return true;
        }

        trace!(
            event_type = %current.event.kind(),
            held = held.len(),
            active = workers.active(),
            "Worker ceiling reached, holding event"
        );
        current.remaining = held;
        *pending = Some(current);
        drained || launched > 0 || deferred > 0
    }

    /// Starts backlogged work for handlers below their ceiling, within the
    /// global ceiling. Backlogs of deregistered handlers are discarded.
    /// Returns true if any worker was started.
    fn drain_backlog(&self, backlog: &mut Backlog, workers: &mut Workers) -> bool {
        if backlog.is_empty() {
            return false;
        }
        let max_workers = self.inner.config.max_workers;
        let handlers = Arc::clone(&self.inner.handlers.read());
        let mut launched = false;

        backlog.retain(|&id, queue| {
            let Some(handler) = handlers.get(&id) else {
                debug!(handler_id = %id, dropped = queue.len(), "Discarding backlog of removed handler");
                return false;
            };
            let limit = handler.get_concurrency().unwrap_or(usize::MAX);
            while workers.active() < max_workers && workers.running(id) < limit {
                let Some(event) = queue.pop_front() else {
                    break;
                };
                let work = run_worker(Arc::clone(&self.inner), id, handler.clone(), event);
                workers.spawn(id, work);
                launched = true;
            }
            !queue.is_empty()
        });
        launched
    }

    /// Refreshes directories, filters and enriches a freshly popped event.
    async fn prepare(&self, event: InboundEvent) -> Option<PendingDispatch> {
        let inner = &self.inner;
        let kind = event.kind();

        if inner.config.user_refresh_types.iter().any(|t| t == kind) {
            debug!(event_type = %kind, "Rebuilding user directory");
            inner
                .directories
                .refresh_users_or_keep(inner.api.as_ref())
                .await;
        } else if inner.config.channel_refresh_types.iter().any(|t| t == kind) {
            debug!(event_type = %kind, "Rebuilding channel directory");
            inner
                .directories
                .refresh_channels_or_keep(inner.api.as_ref())
                .await;
        }

        if !self.accepts(&event) {
            return None;
        }

        let remaining: VecDeque<_> = inner.handlers.read().keys().copied().collect();
        if remaining.is_empty() {
            trace!("No handlers registered, dropping event");
            return None;
        }

        Some(PendingDispatch {
            event: self.enrich(event),
            remaining,
        })
    }

    fn accepts(&self, event: &InboundEvent) -> bool {
        if !event.is_message() {
            trace!(event_type = %event.kind(), "Ignoring non-message event");
            return false;
        }
        if let Some(subtype) = event.subtype()
            && self.inner.config.ignored_subtypes.iter().any(|s| s == subtype)
        {
            trace!(subtype, "Ignoring message subtype");
            return false;
        }
        let me = self.inner.self_id.read().clone();
        if me.is_some() && event.user() == me.as_deref() {
            trace!("Ignoring own message");
            return false;
        }
        if let Some(channel) = event.channel()
            && !self.inner.directories.admits(channel)
        {
            trace!(channel, "Ignoring message from unsubscribed channel");
            return false;
        }
        true
    }

    fn enrich(&self, event: InboundEvent) -> EnrichedEvent {
        let directories = &self.inner.directories;
        let channel_name = event
            .channel()
            .map(|id| directories.resolve_channel(id))
            .unwrap_or_default();
        let user_name = event
            .user()
            .map(|id| directories.resolve_user(id))
            .unwrap_or_default();
        EnrichedEvent::new(Arc::new(event), channel_name, user_name)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handler_count", &self.handler_count())
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

impl DispatcherInner {
    fn reply_channel(&self, handler: &Handler, event: &EnrichedEvent) -> Option<String> {
        match handler.get_reply_to() {
            ReplyTo::Origin => event.channel().map(str::to_string),
            ReplyTo::DirectMessage => event.user().map(str::to_string),
            ReplyTo::Channel(name) => Some(
                self.directories
                    .find_channel(name)
                    .unwrap_or_else(|| name.clone()),
            ),
        }
    }
}

/// One (event, handler) evaluation. Never panics outward.
async fn run_worker(
    inner: Arc<DispatcherInner>,
    id: HandlerId,
    handler: Handler,
    event: EnrichedEvent,
) {
    let work = AssertUnwindSafe(async {
        if !handler.evaluate(&event) {
            return Ok(None);
        }
        trace!(handler_id = %id, "Handler matched");
        handler.act(event.clone(), &inner.config.post_defaults).await
    })
    .catch_unwind();

    let outcome = match handler.get_timeout() {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Err(HandlerError::TimedOut {
                handler: handler.get_name().to_string(),
                timeout: limit,
            })),
        },
        None => work.await,
    };

    let mut payload = match outcome {
        Ok(Ok(Some(payload))) => payload,
        Ok(Ok(None)) => return,
        Ok(Err(err)) => {
            error!(handler_id = %id, handler = %handler.get_name(), error = %err, "Handler failed");
            return;
        }
        Err(_) => {
            let err = HandlerError::Panicked {
                handler: handler.get_name().to_string(),
            };
            error!(handler_id = %id, error = %err, "Handler failed");
            return;
        }
    };

    if !payload.contains_key("channel") {
        let Some(channel) = inner.reply_channel(&handler, &event) else {
            warn!(handler_id = %id, "Reply has no target channel, dropped");
            return;
        };
        payload.insert("channel".into(), channel.into());
    }

    let route = handler.get_route();
    debug!(handler_id = %id, route = ?route, "Queued reply");
    let message = OutboundMessage {
        handler: id,
        route,
        payload,
    };
    if inner.outbound_tx.send(message).is_err() {
        warn!(handler_id = %id, "Outbound queue closed, reply dropped");
    }
}

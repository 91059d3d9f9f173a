//! Startup orchestration.
//!
//! [`HiveRuntime`] wires the Web API client, the dispatcher, the delivery
//! loop and the streaming connection together. Startup runs in a fixed
//! order and any failure aborts it:
//!
//! 1. token present
//! 2. `auth.test` accepts it (records the bot's own user id)
//! 3. channel and user directories load
//! 4. a streaming endpoint is issued
//! 5. the connection opens
//!
//! After that the dispatcher and delivery loops run in the background and
//! every failure is logged and isolated.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use slackhive_runtime::HiveRuntime;
//!
//! let runtime = HiveRuntime::new()?;
//! runtime.register(Handler::new("greeter").phrase("hi").text("hello!"));
//! runtime.run().await?;
//! ```

use std::sync::Arc;

use tokio::signal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use slackhive_core::WebApi;
use slackhive_framework::{Delivery, DispatchError, Dispatcher, Handler, HandlerId};
use slackhive_transport::{ConnectionEvent, Signal, StreamConnection, WebApiClient};

use crate::config::{ConfigLoader, HiveConfig, parse_channel_criteria};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

#[cfg(feature = "http-server")]
use slackhive_transport::CallbackServer;

/// Everything owned by a started runtime.
struct Session {
    shutdown: CancellationToken,
    connection: StreamConnection,
    tasks: Vec<JoinHandle<()>>,
    #[cfg(feature = "http-server")]
    callback: Option<CallbackServer>,
}

/// The bot host.
///
/// A runtime starts once; after [`stop`](Self::stop) create a new one.
pub struct HiveRuntime {
    config: HiveConfig,
    api: Arc<dyn WebApi>,
    dispatcher: Dispatcher,
    session: Mutex<Option<Session>>,
    /// Cancelled on stop, or when the connection closes for good.
    stopped: CancellationToken,
}

impl HiveRuntime {
    /// Loads configuration from the current directory and the environment.
    pub fn new() -> RuntimeResult<Self> {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Initializes logging and builds the Web API client from `config`.
    pub fn from_config(config: HiveConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let client = WebApiClient::new(config.slack.to_web_api_config()).map_err(RuntimeError::Client)?;

        info!(
            log_level = %config.logging.level,
            api_url = %config.slack.api_url,
            max_workers = config.dispatch.max_workers,
            "Runtime initialized from configuration"
        );

        Ok(Self::with_api(config, Arc::new(client)))
    }

    /// Builds a runtime over any [`WebApi`] implementation.
    pub fn with_api(config: HiveConfig, api: Arc<dyn WebApi>) -> Self {
        let post_defaults = config.bot.post_defaults();
        let dispatcher = Dispatcher::new(
            Arc::clone(&api),
            config.dispatch.to_dispatch_config(post_defaults),
        );

        Self {
            config,
            api,
            dispatcher,
            session: Mutex::new(None),
            stopped: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers a handler. Safe to call before or after start.
    pub fn register(&self, handler: Handler) -> HandlerId {
        self.dispatcher.register(handler)
    }

    pub fn register_all(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<HandlerId> {
        self.dispatcher.register_all(handlers)
    }

    pub fn deregister(&self, id: HandlerId) -> bool {
        self.dispatcher.deregister(id)
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// The streaming connection, once started.
    pub async fn connection(&self) -> Option<StreamConnection> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.connection.clone())
    }

    /// The one-time URL endpoint, once started with `callback` configured.
    #[cfg(feature = "http-server")]
    pub async fn callback_server(&self) -> Option<CallbackServer> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.callback.clone())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs the startup sequence and launches the background loops.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() || self.stopped.is_cancelled() {
            return Err(RuntimeError::AlreadyRunning);
        }

        if self.config.slack.token().is_none() {
            return Err(RuntimeError::MissingToken);
        }

        let auth = self.api.auth_test().await.map_err(RuntimeError::Auth)?;
        info!(user = %auth.user, user_id = %auth.user_id, team = %auth.team, "Authenticated");
        self.dispatcher.set_self_id(Some(auth.user_id));

        let criteria = parse_channel_criteria(&self.config.channels)?;
        self.dispatcher.directories().set_criteria(criteria);
        self.dispatcher.prime().await.map_err(|e| match e {
            DispatchError::Prime { source, .. } => RuntimeError::Prime(source),
            DispatchError::AlreadyRunning => RuntimeError::AlreadyRunning,
        })?;

        let endpoint = self
            .api
            .connect_stream()
            .await
            .map_err(RuntimeError::Endpoint)?;
        debug!(url = %endpoint.url, "Streaming endpoint issued");

        let shutdown = self.stopped.child_token();
        let connection = self.connect(&endpoint.url, &shutdown).await?;
        let Some(outbound) = self.dispatcher.take_outbound() else {
            connection.close().await;
            return Err(RuntimeError::AlreadyRunning);
        };

        let mut tasks = Vec::new();

        let dispatcher = self.dispatcher.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.run(token).await {
                error!(error = %e, "Dispatcher exited");
            }
        }));

        let delivery = Delivery::new(
            Arc::clone(&self.api),
            self.config
                .dispatch
                .to_delivery_config(&self.config.stream.retry),
        )
        .with_stream(Arc::new(connection.clone()));
        tasks.push(tokio::spawn(delivery.run(outbound, shutdown.clone())));

        #[cfg(feature = "http-server")]
        let callback = match &self.config.callback {
            Some(settings) => match CallbackServer::bind(settings.to_server_config()).await {
                Ok(server) => Some(server),
                Err(e) => {
                    shutdown.cancel();
                    connection.close().await;
                    return Err(RuntimeError::Connect(e));
                }
            },
            None => None,
        };
        #[cfg(not(feature = "http-server"))]
        if self.config.callback.is_some() {
            warn!("Callback endpoint configured but the http-server feature is disabled");
        }

        *session = Some(Session {
            shutdown,
            connection,
            tasks,
            #[cfg(feature = "http-server")]
            callback,
        });

        info!(handlers = self.dispatcher.handler_count(), "Runtime started");
        Ok(())
    }

    /// Opens the streaming connection and feeds it into the dispatcher.
    async fn connect(&self, url: &str, shutdown: &CancellationToken) -> RuntimeResult<StreamConnection> {
        let connection = StreamConnection::new(self.config.stream.to_stream_config(url));

        let inbound = self.dispatcher.inbound_sender();
        connection.bind(ConnectionEvent::Message, move |signal| {
            if let Signal::Message(event) = signal {
                let _ = inbound.send(event);
            }
        });
        connection.bind(ConnectionEvent::Error, |signal| {
            if let Signal::Error(e) = signal {
                warn!(error = %e, "Stream connection error");
            }
        });
        if !self.config.stream.auto_reconnect {
            let token = shutdown.clone();
            connection.bind(ConnectionEvent::Close, move |_| {
                warn!("Stream connection closed and reconnect is disabled, stopping");
                token.cancel();
            });
        }

        if let Err(e) = connection.start().await {
            connection.close().await;
            return Err(RuntimeError::Connect(e));
        }
        Ok(connection)
    }

    /// Stops the loops, closes the connection and waits for the tasks.
    pub async fn stop(&self) -> RuntimeResult<()> {
        self.stopped.cancel();
        let Some(session) = self.session.lock().await.take() else {
            warn!("Runtime is not running");
            return Ok(());
        };

        info!("Stopping runtime");
        session.shutdown.cancel();
        session.connection.close().await;
        #[cfg(feature = "http-server")]
        if let Some(callback) = &session.callback {
            callback.shutdown();
        }
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Runtime stopped");
        Ok(())
    }

    /// Starts, then runs until Ctrl+C, SIGTERM, or a terminal disconnect.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("slackhive is running. Press Ctrl+C to stop.");

        tokio::select! {
            _ = wait_for_signal() => {}
            _ = self.terminated() => {}
        }

        self.stop().await
    }

    /// Starts, then runs until `shutdown` resolves or the connection closes
    /// for good.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::select! {
            _ = shutdown => {}
            _ = self.terminated() => {}
        }
        self.stop().await
    }

    /// Resolves once the session's shutdown token fires.
    async fn terminated(&self) {
        let token = match self.session.lock().await.as_ref() {
            Some(session) => session.shutdown.clone(),
            None => return,
        };
        token.cancelled().await;
    }
}

impl std::fmt::Debug for HiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiveRuntime")
            .field("dispatcher", &self.dispatcher)
            .field("stopped", &self.stopped.is_cancelled())
            .finish()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`HiveRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    api: Option<Arc<dyn WebApi>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            api: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: HiveConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Overrides one dotted configuration key.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Uses `api` instead of the HTTP client built from `slack` settings.
    pub fn api(mut self, api: Arc<dyn WebApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn build(self) -> RuntimeResult<HiveRuntime> {
        let config = self.config_loader.load()?;
        match self.api {
            Some(api) => {
                logging::init_from_config(&config.logging);
                Ok(HiveRuntime::with_api(config, api))
            }
            None => HiveRuntime::from_config(config),
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

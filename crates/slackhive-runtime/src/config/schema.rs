//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use slackhive_core::payload::DEFAULT_BOT_NAME;
use slackhive_core::{PostOptions, RetryConfig, StreamConfig, WebApiConfig};
use slackhive_framework::DeliveryConfig;
use slackhive_framework::DispatchConfig;
use slackhive_framework::dispatcher::{CHANNEL_REFRESH_TYPES, USER_REFRESH_TYPES};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HiveConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Web API credentials and endpoint.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Streaming connection settings.
    #[serde(default)]
    pub stream: StreamSettings,

    /// Dispatch engine settings.
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Bot identity and post defaults.
    #[serde(default)]
    pub bot: BotSettings,

    /// Channel subscription criteria. Empty subscribes to every channel.
    #[serde(default)]
    pub channels: Vec<String>,

    /// One-time callback endpoint. Disabled when absent.
    #[serde(default)]
    pub callback: Option<CallbackSettings>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEventConfig {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close, which carries the span's busy/idle time.
    pub const LIFECYCLE: Self = Self {
        new: true,
        close: true,
        ..Self::NONE
    };

    pub const ALL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
    /// Per-module levels, e.g. `slackhive_transport = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Slack
// =============================================================================

/// Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bearer token. Falls back to `SLACK_TOKEN` when unset.
    pub token: Option<String>,
    pub api_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://slack.com/api".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl SlackConfig {
    /// The configured token, ignoring empty strings.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn to_web_api_config(&self) -> WebApiConfig {
        let config =
            WebApiConfig::new(self.api_url.clone()).with_timeout(Duration::from_millis(self.timeout_ms));
        match self.token() {
            Some(token) => config.with_token(token),
            None => config,
        }
    }
}

// =============================================================================
// Stream
// =============================================================================

/// Backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Consecutive attempts before giving up. Unlimited when absent.
    pub max_retries: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_retries: self.max_retries,
        }
    }
}

/// Streaming connection settings. The endpoint itself is obtained at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub auto_reconnect: bool,
    /// Seconds allowed for one connection handshake.
    pub connect_timeout_secs: u64,
    /// Idle seconds before a keepalive ping.
    pub keepalive_secs: u64,
    /// Seconds `start` waits for the connection to open. 0 does not wait.
    pub open_wait_secs: u64,
    pub poll_interval_ms: u64,
    pub retry: RetrySettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            connect_timeout_secs: 10,
            keepalive_secs: 15,
            open_wait_secs: 15,
            poll_interval_ms: 10,
            retry: RetrySettings::default(),
        }
    }
}

impl StreamSettings {
    pub fn to_stream_config(&self, url: impl Into<String>) -> StreamConfig {
        let open_wait = (self.open_wait_secs > 0).then(|| Duration::from_secs(self.open_wait_secs));
        StreamConfig {
            url: url.into(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            auto_reconnect: self.auto_reconnect,
            keepalive_threshold: Duration::from_secs(self.keepalive_secs),
            open_wait_timeout: open_wait,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: self.retry.to_retry_config(),
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatch engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Global ceiling on concurrently running handler workers.
    pub max_workers: usize,
    pub tick_ms: u64,
    pub ignored_subtypes: Vec<String>,
    pub user_refresh_types: Vec<String>,
    pub channel_refresh_types: Vec<String>,
    /// Web API post retries before a reply is dropped.
    pub post_retries: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 50,
            tick_ms: 1,
            ignored_subtypes: vec!["bot_message".to_string()],
            user_refresh_types: USER_REFRESH_TYPES.iter().map(|s| s.to_string()).collect(),
            channel_refresh_types: CHANNEL_REFRESH_TYPES.iter().map(|s| s.to_string()).collect(),
            post_retries: 3,
        }
    }
}

impl DispatchSettings {
    pub fn to_dispatch_config(&self, post_defaults: PostOptions) -> DispatchConfig {
        DispatchConfig {
            max_workers: self.max_workers,
            tick: Duration::from_millis(self.tick_ms),
            ignored_subtypes: self.ignored_subtypes.clone(),
            user_refresh_types: self.user_refresh_types.clone(),
            channel_refresh_types: self.channel_refresh_types.clone(),
            post_defaults,
        }
    }

    pub fn to_delivery_config(&self, retry: &RetrySettings) -> DeliveryConfig {
        DeliveryConfig {
            post_retries: self.post_retries,
            retry: retry.to_retry_config(),
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Bot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Display name, used as the default `username` of every post.
    pub name: String,
    /// Extra post fields layered over the built-in defaults.
    pub post: PostOptions,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_BOT_NAME.to_string(),
            post: PostOptions::new(),
        }
    }
}

impl BotSettings {
    /// Built-in defaults for `name`, overlaid with `post`.
    pub fn post_defaults(&self) -> PostOptions {
        let mut defaults = PostOptions::defaults(&self.name);
        defaults.extend(&self.post);
        defaults
    }
}

// =============================================================================
// Callback endpoint
// =============================================================================

/// One-time callback URL endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub path: String,
    /// Externally reachable base URL, if different from the bound address.
    pub public_url: Option<String>,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            path: "/hive".to_string(),
            public_url: None,
        }
    }
}

#[cfg(feature = "http-server")]
impl CallbackSettings {
    pub fn to_server_config(&self) -> slackhive_transport::CallbackServerConfig {
        slackhive_transport::CallbackServerConfig {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            public_url: self.public_url.clone(),
        }
    }
}

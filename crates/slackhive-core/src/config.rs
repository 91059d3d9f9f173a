//! Configuration types for the transports.

use std::time::Duration;

// =============================================================================
// Retry Config
// =============================================================================

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Maximum number of consecutive attempts (None = infinite).
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// The delay that follows `current`, capped at `max_delay`. A product
    /// that is not a valid duration (NaN, infinite, overflowing) yields the cap.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_retries.is_none_or(|max| attempts < max)
    }
}

// =============================================================================
// Stream Config
// =============================================================================

/// Configuration for the streaming connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Initial WebSocket endpoint. The service may replace it at runtime.
    pub url: String,
    /// Limit on one TCP plus WebSocket handshake; expiry counts as a failed attempt.
    pub connect_timeout: Duration,
    /// Whether to reconnect after the connection closes.
    pub auto_reconnect: bool,
    /// Idle time after which a protocol ping is sent.
    pub keepalive_threshold: Duration,
    /// If set, `start` blocks until the connection is open or this elapses.
    pub open_wait_timeout: Option<Duration>,
    /// How often the receive loop checks the keepalive clock.
    pub poll_interval: Duration,
    /// Backoff between failed connection attempts.
    pub retry: RetryConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            keepalive_threshold: Duration::from_secs(15),
            open_wait_timeout: Some(Duration::from_secs(15)),
            poll_interval: Duration::from_millis(10),
            retry: RetryConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Creates a config for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Creates a config with auto-reconnect disabled.
    pub fn no_reconnect(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: false,
            ..Default::default()
        }
    }

    /// Sets the keepalive threshold.
    pub fn with_keepalive(mut self, threshold: Duration) -> Self {
        self.keepalive_threshold = threshold;
        self
    }

    /// Sets (or clears) the open-wait timeout.
    pub fn with_open_wait(mut self, timeout: Option<Duration>) -> Self {
        self.open_wait_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// Web API Config
// =============================================================================

/// Configuration for the request/response API client.
#[derive(Debug, Clone)]
pub struct WebApiConfig {
    /// Base URL; method names are appended, e.g. `{api_url}/auth.test`.
    pub api_url: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl WebApiConfig {
    /// Creates a config for the given base URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WebApiConfig {
    fn default() -> Self {
        Self::new("https://slack.com/api")
    }
}

//! Runtime error types.
//!
//! Only startup can fail: once the runtime is running every failure is
//! logged and isolated by the layer that produced it.

use thiserror::Error;

use slackhive_core::{ApiError, TransportError};

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No bearer token was configured.
    #[error("No Slack token configured (set slack.token or SLACK_TOKEN)")]
    MissingToken,

    /// The Web API client could not be built.
    #[error("Failed to build Web API client: {0}")]
    Client(#[source] ApiError),

    /// The token was rejected by `auth.test`.
    #[error("Authentication failed: {0}")]
    Auth(#[source] ApiError),

    /// The channel or user directory could not be loaded.
    #[error("Failed to load directories: {0}")]
    Prime(#[source] ApiError),

    /// The streaming endpoint could not be obtained.
    #[error("Failed to obtain streaming endpoint: {0}")]
    Endpoint(#[source] ApiError),

    /// The streaming connection could not be opened.
    #[error("Failed to connect: {0}")]
    Connect(#[from] TransportError),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `run` was called on a runtime that is already running.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

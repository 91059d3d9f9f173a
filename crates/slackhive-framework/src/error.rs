//! Error types for the slackhive framework.

use std::time::Duration;

use thiserror::Error;

use slackhive_core::ApiError;

/// Failures inside a single handler invocation.
///
/// These never leave the worker that produced them: the worker logs the
/// error with the handler id and exits.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The action returned an error.
    #[error("handler '{handler}' failed: {reason}")]
    Action {
        /// Handler name.
        handler: String,
        /// What went wrong.
        reason: String,
    },

    /// A condition or the action panicked.
    #[error("handler '{handler}' panicked")]
    Panicked {
        /// Handler name.
        handler: String,
    },

    /// The action did not finish within the handler's timeout.
    #[error("handler '{handler}' timed out after {timeout:?}")]
    TimedOut {
        /// Handler name.
        handler: String,
        /// The configured limit.
        timeout: Duration,
    },

    /// Custom error raised by handler code.
    #[error("{0}")]
    Custom(String),
}

impl HandlerError {
    /// Creates a custom handler error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<ApiError> for HandlerError {
    fn from(err: ApiError) -> Self {
        Self::Custom(err.to_string())
    }
}

/// Errors surfaced by the dispatch engine itself.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// `run` was called while another run loop owns the inbound queue.
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// A directory could not be primed.
    #[error("failed to load {directory} directory: {source}")]
    Prime {
        /// `channels` or `users`.
        directory: &'static str,
        /// The underlying API failure.
        #[source]
        source: ApiError,
    },
}

/// Result type for handler actions.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

//! Unified error types for the slackhive core.
//!
//! Framework-level errors (handler failures) live in `slackhive-framework`,
//! startup errors in `slackhive-runtime`.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Codec Errors
// =============================================================================

/// Errors produced while decoding or encoding a wire frame.
///
/// A decode error is never fatal to a connection: the frame is dropped and
/// the receive loop carries on.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The frame is not valid JSON, or not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame has no string `type` discriminant.
    #[error("frame has no `type` discriminant")]
    MissingType,

    /// An outbound payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in the streaming transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The connection did not reach `open` in time.
    #[error("timed out after {0:?} waiting for the connection to open")]
    OpenTimeout(Duration),

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// A callback was bound to an event type the connection does not emit.
    #[error("unknown connection event type '{0}' (expected open, close, error or message)")]
    UnknownEventType(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        Self::SendFailed(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for request/response API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No token was supplied, or the service rejected it.
    #[error("not authenticated")]
    NotAuthed,

    /// The service answered with `ok: false`.
    #[error("{method} failed: {error}")]
    Slack {
        /// API method name, e.g. `chat.postMessage`.
        method: String,
        /// Error code reported by the service.
        error: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Returns true when retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::Slack { error, .. } => error == "ratelimited",
            Self::NotAuthed | Self::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

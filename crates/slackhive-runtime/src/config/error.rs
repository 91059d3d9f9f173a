//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file extension has no enabled format feature.
    #[error("Unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Merged sources did not deserialize into the schema.
    #[error("Failed to read configuration: {0}")]
    Extract(String),

    /// A required key is absent or blank.
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    /// A key holds a value outside its allowed range.
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A URL key has an unexpected scheme.
    #[error("Invalid URL for {field}: {url} (expected http:// or https://)")]
    InvalidUrl { field: &'static str, url: String },

    /// A `channels` entry is empty or its pattern does not compile.
    #[error("Invalid channel criterion {criterion:?}: {reason}")]
    InvalidChannel { criterion: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

//! Configuration module for the slackhive runtime.
//!
//! Layered figment loading of [`HiveConfig`] plus validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    BotSettings, CallbackSettings, DispatchSettings, HiveConfig, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, RetrySettings, SlackConfig, SpanEventConfig, StreamSettings,
};
pub use validation::{parse_channel_criteria, validate_config};

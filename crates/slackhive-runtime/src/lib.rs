//! slackhive runtime: startup orchestration for the slackhive bot host.
//!
//! This crate provides:
//! - [`HiveRuntime`], which authenticates, primes the directories, opens the
//!   streaming connection and runs the dispatcher and delivery loops
//! - Layered configuration ([`config`]) on figment
//! - Logging setup ([`logging`]) on `tracing-subscriber`
//!
//! ```ignore
//! use slackhive_framework::Handler;
//! use slackhive_runtime::HiveRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HiveRuntime::new()?;
//!     runtime.register(Handler::new("greeter").phrase("hello").text("hi!"));
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `toml-config` (default) / `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines
//! - `http-server`: the one-time callback URL endpoint

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, HiveConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{HiveRuntime, RuntimeBuilder};

// Re-export tracing for use by bot code
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

//! # slackhive
//!
//! A host for many small Slack bots sharing one connection.
//!
//! ## Overview
//!
//! Every handler is a match/act unit: a set of conditions (phrases, regular
//! expressions or predicates) combined with AND or OR, and an action that
//! turns a matching message into a reply. The host owns the streaming
//! connection, keeps channel and user directories fresh, and fans each
//! message out to the handlers concurrently under a worker ceiling.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌─────────────────────────────┐
//! │ Connection │────▶│ Dispatcher │────▶│ Handler "greeter" (worker)  │──┐
//! │ (stream)   │     │ (enrich)   │────▶│ Handler "deployer" (worker) │──┤
//! └────────────┘     └────────────┘────▶│ Handler ...        (worker) │──┤
//!       ▲                               └─────────────────────────────┘  │
//!       │             ┌──────────┐                                       │
//!       └─────────────│ Delivery │◀──────────────────────────────────────┘
//!                     └──────────┘──▶ Web API (chat.postMessage)
//! ```
//!
//! - **Runtime**: loads configuration, authenticates, primes directories and
//!   owns the connection
//! - **Dispatcher**: filters, enriches and fans out inbound messages
//! - **Handlers**: user conditions and actions, isolated from each other
//! - **Delivery**: posts replies over the Web API or the stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slackhive::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RuntimeError> {
//!     let runtime = HiveRuntime::new()?;
//!
//!     runtime.register(
//!         Handler::new("greeter")
//!             .phrase("hello")
//!             .reply(|event| format!("Hello, {}!", event.user_name())),
//!     );
//!
//!     runtime.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `http-server`: one-time callback URLs

pub use slackhive_core as core;
pub use slackhive_framework as framework;
pub use slackhive_runtime as runtime;
pub use slackhive_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use slackhive::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use slackhive_runtime::{HiveConfig, HiveRuntime, RuntimeBuilder, RuntimeError, RuntimeResult};

    // Handler model
    pub use slackhive_framework::{
        Condition, Handler, HandlerError, HandlerId, HandlerResult, Logic, Reply,
    };

    // Events and reply shaping
    pub use slackhive_core::{EnrichedEvent, InboundEvent, Payload, PostOptions, ReplyTo, Route};
}

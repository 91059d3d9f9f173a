//! # slackhive transport
//!
//! Network transports for the slackhive bot host, feature-gated like the
//! rest of the stack.
//!
//! ## Features
//!
//! - `ws-client` (default): the streaming [`StreamConnection`]
//! - `http-client` (default): the [`WebApiClient`] request/response client
//! - `http-server`: the one-time URL [`CallbackServer`]
//! - `full`: all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  slackhive-framework│  (written against WebApi / StreamSender)
//! ├─────────────────────┤
//! │  slackhive-core     │  (seam traits, codec, config)
//! ├─────────────────────┤
//! │  slackhive-transport│  <- This crate (implementations)
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slackhive_core::{StreamConfig, WebApi, WebApiConfig};
//! use slackhive_transport::{ConnectionEvent, Signal, StreamConnection, WebApiClient};
//!
//! let api = WebApiClient::new(WebApiConfig::default().with_token(token))?;
//! let endpoint = api.connect_stream().await?;
//!
//! let conn = StreamConnection::new(StreamConfig::new(endpoint.url));
//! conn.bind(ConnectionEvent::Message, |signal| {
//!     if let Signal::Message(event) = signal {
//!         println!("{}", event.kind());
//!     }
//! });
//! conn.start().await?;
//! ```

#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

#[cfg(feature = "ws-client")]
pub use websocket::{Callback, ConnectionEvent, ConnectionStatus, Signal, StreamConnection};

#[cfg(feature = "http-client")]
pub use http::WebApiClient;

#[cfg(feature = "http-server")]
pub use http::{CallbackRequest, CallbackResponse, CallbackServer, CallbackServerConfig, UrlCallback};

//! Request/response transports.
//!
//! The client side speaks the service's Web API; the server side hands out
//! one-time callback URLs.

#[cfg(feature = "http-server")]
mod callback;
#[cfg(feature = "http-server")]
pub use callback::{CallbackRequest, CallbackResponse, CallbackServer, CallbackServerConfig, UrlCallback};

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::WebApiClient;

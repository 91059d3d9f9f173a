//! Streaming WebSocket transport.

mod client;

pub use client::{Callback, ConnectionEvent, ConnectionStatus, Signal, StreamConnection};

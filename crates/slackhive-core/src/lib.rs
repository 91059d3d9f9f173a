//! # slackhive core
//!
//! Shared building blocks for the slackhive bot host.
//!
//! ## Contents
//!
//! - **Event model**: [`InboundEvent`] as decoded from the wire and
//!   [`EnrichedEvent`] with resolved channel and user names.
//! - **Codec**: [`codec::decode`], [`codec::decode_frame`] and
//!   [`codec::encode`] for the JSON frames of the streaming endpoint.
//! - **Payloads**: post layering ([`PostOptions`], [`merge_post`]) and
//!   routing ([`Route`], [`ReplyTo`]).
//! - **Seams**: the [`WebApi`] and [`StreamSender`] traits the framework is
//!   written against, implemented by `slackhive-transport`.
//! - **Errors**: one error enum per concern.
//!
//! ## Data Flow
//!
//! ```text
//! ┌────────────┐  frames  ┌─────────┐ events ┌────────────┐ payloads ┌──────────┐
//! │ Connection │─────────▶│  Codec  │───────▶│ Dispatcher │─────────▶│ Delivery │
//! └────────────┘          └─────────┘        └────────────┘          └──────────┘
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod payload;

pub use api::{AuthInfo, ChannelInfo, StreamEndpoint, StreamSender, UserInfo, WebApi};
pub use codec::Frame;
pub use config::{RetryConfig, StreamConfig, WebApiConfig};
pub use error::{
    ApiError, ApiResult, CodecError, CodecResult, TransportError, TransportResult,
};
pub use event::{EnrichedEvent, InboundEvent};
pub use payload::{Payload, PostOptions, ReplyTo, Route, merge_post, text_payload};

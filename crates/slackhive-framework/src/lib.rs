//! # slackhive framework
//!
//! Handler model and dispatch engine for the slackhive bot host.
//!
//! This layer provides:
//! - [`Condition`]s (word-bounded phrases, regexes, predicates) and the
//!   [`Handler`] builder that combines them with an action
//! - [`Directories`] that turn channel and user ids into names
//! - The [`Dispatcher`] run loop with global and per-handler worker ceilings
//! - [`Delivery`] of handler replies over the web API or the stream
//!
//! The framework only talks to the outside world through the
//! [`WebApi`](slackhive_core::WebApi) and
//! [`StreamSender`](slackhive_core::StreamSender) traits, so it can be
//! driven entirely in memory.

pub mod condition;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod outbound;

#[cfg(test)]
mod testing;

pub use condition::{Condition, contains_phrase};
pub use directory::{ChannelCriterion, Directories, Directory};
pub use dispatcher::{DispatchConfig, Dispatcher, HandlerId};
pub use error::{DispatchError, DispatchResult, HandlerError, HandlerResult};
pub use handler::{ActionFn, BoxFuture, Handler, Logic, Reply};
pub use outbound::{Delivery, DeliveryConfig, OutboundMessage};

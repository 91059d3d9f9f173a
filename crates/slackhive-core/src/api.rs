//! Seams to the remote service.
//!
//! [`WebApi`] is the request/response transport (directory queries, posting,
//! endpoint acquisition); [`StreamSender`] is the send half of the streaming
//! connection. The framework is written against these traits only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiResult, TransportResult};
use crate::payload::Payload;

/// A channel as listed by the directory API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_member: bool,
}

/// A user as listed by the directory API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// Identity behind the token, as reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub user_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub team: String,
}

/// A freshly issued streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    /// WebSocket URL, valid for a single connection attempt.
    pub url: String,
    /// The bot's own user id, when the service reports it.
    pub self_id: Option<String>,
}

/// The request/response transport.
///
/// Each call either returns the success body or an error. Startup treats
/// errors as fatal; steady-state callers log and retry.
#[async_trait]
pub trait WebApi: Send + Sync {
    /// Verifies the token and returns the identity behind it.
    async fn auth_test(&self) -> ApiResult<AuthInfo>;

    /// Obtains a streaming endpoint URL.
    async fn connect_stream(&self) -> ApiResult<StreamEndpoint>;

    /// Lists every channel visible to the token.
    async fn list_channels(&self) -> ApiResult<Vec<ChannelInfo>>;

    /// Lists every user in the workspace.
    async fn list_users(&self) -> ApiResult<Vec<UserInfo>>;

    /// Posts a message; `payload` must carry `channel`.
    async fn post_message(&self, payload: &Payload) -> ApiResult<Value>;
}

/// The send half of a streaming connection.
pub trait StreamSender: Send + Sync {
    /// Queues a payload and returns the sequence id attached to it.
    fn send(&self, payload: Payload) -> TransportResult<u64>;
}

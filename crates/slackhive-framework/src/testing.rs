//! In-memory fakes for the transport seams.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use slackhive_core::{
    ApiError, ApiResult, AuthInfo, ChannelInfo, Payload, StreamEndpoint, StreamSender,
    TransportResult, UserInfo, WebApi,
};

pub fn channel(id: &str, name: &str) -> ChannelInfo {
    ChannelInfo {
        id: id.into(),
        name: name.into(),
        is_archived: false,
        is_member: true,
    }
}

pub fn user(id: &str, name: &str) -> UserInfo {
    UserInfo {
        id: id.into(),
        name: name.into(),
        real_name: None,
        is_bot: false,
        deleted: false,
    }
}

#[derive(Default)]
pub struct FakeApi {
    channels: Mutex<Vec<ChannelInfo>>,
    users: Mutex<Vec<UserInfo>>,
    pub posts: Mutex<Vec<Payload>>,
    pub fail_lists: AtomicBool,
    /// Number of upcoming posts that fail with a retryable error.
    pub failing_posts: AtomicUsize,
    pub reject_posts: AtomicBool,
    pub post_attempts: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(self, channels: Vec<ChannelInfo>) -> Self {
        self.set_channels(channels);
        self
    }

    pub fn with_users(self, users: Vec<UserInfo>) -> Self {
        *self.users.lock() = users;
        self
    }

    pub fn set_channels(&self, channels: Vec<ChannelInfo>) {
        *self.channels.lock() = channels;
    }

    pub fn posted(&self) -> Vec<Payload> {
        self.posts.lock().clone()
    }

    fn list_failure(&self) -> ApiResult<()> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ApiError::Http {
                status: 500,
                body: "directory unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WebApi for FakeApi {
    async fn auth_test(&self) -> ApiResult<AuthInfo> {
        Ok(AuthInfo {
            user_id: "U0BOT".into(),
            user: "hive".into(),
            team_id: "T1".into(),
            team: "acme".into(),
        })
    }

    async fn connect_stream(&self) -> ApiResult<StreamEndpoint> {
        Ok(StreamEndpoint {
            url: "ws://127.0.0.1:9".into(),
            self_id: Some("U0BOT".into()),
        })
    }

    async fn list_channels(&self) -> ApiResult<Vec<ChannelInfo>> {
        self.list_failure()?;
        Ok(self.channels.lock().clone())
    }

    async fn list_users(&self) -> ApiResult<Vec<UserInfo>> {
        self.list_failure()?;
        Ok(self.users.lock().clone())
    }

    async fn post_message(&self, payload: &Payload) -> ApiResult<Value> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_posts.load(Ordering::SeqCst) {
            return Err(ApiError::Slack {
                method: "chat.postMessage".into(),
                error: "channel_not_found".into(),
            });
        }
        let failing = self.failing_posts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_posts.store(failing - 1, Ordering::SeqCst);
            return Err(ApiError::Http {
                status: 503,
                body: "try again".into(),
            });
        }
        self.posts.lock().push(payload.clone());
        Ok(json!({"ok": true}))
    }
}

#[derive(Default)]
pub struct FakeStream {
    next_id: AtomicU64,
    pub sent: Mutex<Vec<Payload>>,
}

impl StreamSender for FakeStream {
    fn send(&self, mut payload: Payload) -> TransportResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        payload.insert("id".into(), id.into());
        self.sent.lock().push(payload);
        Ok(id)
    }
}

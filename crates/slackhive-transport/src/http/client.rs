//! Web API client.
//!
//! Every method is a request to `{api_url}/{method}` with the bearer token;
//! the response body must carry `ok: true`, otherwise its `error` code is
//! surfaced as [`ApiError::Slack`].

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use slackhive_core::{
    ApiError, ApiResult, AuthInfo, ChannelInfo, Payload, StreamEndpoint, TransportError,
    UserInfo, WebApi, WebApiConfig,
};

/// Page size for cursor-paginated list methods.
const PAGE_LIMIT: &str = "200";

/// Response bodies longer than this are truncated in errors.
const MAX_ERROR_BODY: usize = 512;

/// Error codes that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "not_authed",
    "invalid_auth",
    "account_inactive",
    "token_revoked",
];

/// `reqwest`-backed implementation of [`WebApi`].
#[derive(Debug, Clone)]
pub struct WebApiClient {
    client: Client,
    config: WebApiConfig,
}

impl WebApiClient {
    /// Creates a client for the given config.
    pub fn new(config: WebApiConfig) -> ApiResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebApiConfig {
        &self.config
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), method)
    }

    fn token(&self) -> ApiResult<&str> {
        self.config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::NotAuthed)
    }

    /// Calls a write-style method with a JSON body.
    pub async fn call(&self, method: &str, body: &Value) -> ApiResult<Value> {
        let request = self
            .client
            .post(self.endpoint(method))
            .bearer_auth(self.token()?)
            .json(body);
        self.execute(method, request).await
    }

    /// Calls a read-style method with query parameters.
    pub async fn query(&self, method: &str, params: &[(&str, &str)]) -> ApiResult<Value> {
        let url = Url::parse_with_params(&self.endpoint(method), params)
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        let request = self.client.get(url).bearer_auth(self.token()?);
        self.execute(method, request).await
    }

    async fn execute(&self, method: &str, request: RequestBuilder) -> ApiResult<Value> {
        trace!(method, "Calling web API");
        let response = request.send().await.map_err(|e| {
            TransportError::ConnectionFailed {
                url: self.endpoint(method),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Serialization(e.to_string()))?;
        check_ok(method, body)
    }

    /// Walks a cursor-paginated list method, collecting `field` from every
    /// page.
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
        extra: &[(&str, &str)],
    ) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![("limit", PAGE_LIMIT), ("cursor", cursor.as_str())];
            params.extend_from_slice(extra);
            let mut page = self.query(method, &params).await?;

            let batch = page
                .get_mut(field)
                .map(Value::take)
                .unwrap_or_else(|| json!([]));
            let batch: Vec<T> = serde_json::from_value(batch)?;
            items.extend(batch);

            let next = page
                .pointer("/response_metadata/next_cursor")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if next.is_empty() {
                break;
            }
            cursor = next.to_string();
        }

        debug!(method, count = items.len(), "Listed directory");
        Ok(items)
    }
}

fn check_ok(method: &str, body: Value) -> ApiResult<Value> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    if AUTH_ERRORS.contains(&error) {
        return Err(ApiError::NotAuthed);
    }
    Err(ApiError::Slack {
        method: method.to_string(),
        error: error.to_string(),
    })
}

#[async_trait]
impl WebApi for WebApiClient {
    async fn auth_test(&self) -> ApiResult<AuthInfo> {
        let body = self.call("auth.test", &json!({})).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn connect_stream(&self) -> ApiResult<StreamEndpoint> {
        let body = self.call("rtm.connect", &json!({})).await?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Serialization("rtm.connect response has no url".into()))?;
        let self_id = body
            .pointer("/self/id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(StreamEndpoint {
            url: url.to_string(),
            self_id,
        })
    }

    async fn list_channels(&self) -> ApiResult<Vec<ChannelInfo>> {
        self.list_all(
            "conversations.list",
            "channels",
            &[("types", "public_channel,private_channel")],
        )
        .await
    }

    async fn list_users(&self) -> ApiResult<Vec<UserInfo>> {
        self.list_all("users.list", "members", &[]).await
    }

    async fn post_message(&self, payload: &Payload) -> ApiResult<Value> {
        if !payload.contains_key("channel") {
            return Err(ApiError::Serialization(
                "chat.postMessage payload has no channel".into(),
            ));
        }
        self.call("chat.postMessage", &Value::Object(payload.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "xoxb-test";

    fn client(server: &MockServer) -> WebApiClient {
        WebApiClient::new(WebApiConfig::new(server.uri()).with_token(TOKEN)).unwrap()
    }

    #[tokio::test]
    async fn test_auth_test_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user_id": "U0BOT",
                "user": "hive",
                "team_id": "T1",
                "team": "acme"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = client(&server).auth_test().await.unwrap();
        assert_eq!(auth.user_id, "U0BOT");
        assert_eq!(auth.team, "acme");
    }

    #[tokio::test]
    async fn test_missing_token_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let api = WebApiClient::new(WebApiConfig::new(server.uri())).unwrap();
        assert!(matches!(api.auth_test().await, Err(ApiError::NotAuthed)));
    }

    #[tokio::test]
    async fn test_rejected_token_maps_to_not_authed() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).auth_test().await,
            Err(ApiError::NotAuthed)
        ));
    }

    #[tokio::test]
    async fn test_error_code_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let mut payload = Payload::new();
        payload.insert("channel".into(), json!("C404"));
        let err = client(&server).post_message(&payload).await.unwrap_err();
        match err {
            ApiError::Slack { method, error } => {
                assert_eq!(method, "chat.postMessage");
                assert_eq!(error, "channel_not_found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(path("/rtm.connect"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client(&server).connect_stream().await.unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_stream_reads_url_and_self() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtm.connect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": "wss://stream.example/abc",
                "self": {"id": "U0BOT", "name": "hive"}
            })))
            .mount(&server)
            .await;

        let endpoint = client(&server).connect_stream().await.unwrap();
        assert_eq!(endpoint.url, "wss://stream.example/abc");
        assert_eq!(endpoint.self_id.as_deref(), Some("U0BOT"));
    }

    #[tokio::test]
    async fn test_list_channels_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .and(query_param("cursor", ""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [{"id": "C1", "name": "general"}],
                "response_metadata": {"next_cursor": "page2"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [{"id": "C2", "name": "random", "is_archived": true}],
                "response_metadata": {"next_cursor": ""}
            })))
            .mount(&server)
            .await;

        let channels = client(&server).list_channels().await.unwrap();
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["general", "random"]);
        assert!(channels[1].is_archived);
    }

    #[tokio::test]
    async fn test_list_users_reads_members() {
        let server = MockServer::start().await;
        Mock::given(path("/users.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "members": [
                    {"id": "U1", "name": "alice", "real_name": "Alice"},
                    {"id": "U2", "name": "deploybot", "is_bot": true}
                ]
            })))
            .mount(&server)
            .await;

        let users = client(&server).list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].real_name.as_deref(), Some("Alice"));
        assert!(users[1].is_bot);
    }

    #[tokio::test]
    async fn test_post_message_sends_payload_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(json!({
                "channel": "C1",
                "text": "hello",
                "icon_emoji": ":squirrel:"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "ts": "1.0"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut payload = Payload::new();
        payload.insert("channel".into(), json!("C1"));
        payload.insert("text".into(), json!("hello"));
        payload.insert("icon_emoji".into(), json!(":squirrel:"));

        let body = client(&server).post_message(&payload).await.unwrap();
        assert_eq!(body["ts"], "1.0");
    }

    #[tokio::test]
    async fn test_post_without_channel_is_rejected_locally() {
        let server = MockServer::start().await;
        let err = client(&server)
            .post_message(&slackhive_core::text_payload("orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Serialization(_)));
    }
}

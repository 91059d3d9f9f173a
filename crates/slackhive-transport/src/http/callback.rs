//! One-time callback URLs.
//!
//! Handlers call [`CallbackServer::register`] to mint a URL they can embed in
//! a reply. The first request to that URL is answered by the registered
//! callback and the URL is then retired.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use slackhive_core::{TransportError, TransportResult};

/// Body served for ids that were never issued or were already used.
pub const UNUSED_URL_BODY: &str = "Error, unused URL.";

/// Ids that always answer 404 (browser noise).
const NOT_FOUND_IDS: &[&str] = &["favicon.ico"];

/// Where and how the callback endpoint listens.
#[derive(Debug, Clone)]
pub struct CallbackServerConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    /// Path prefix under which ids are served, e.g. `/hive`.
    pub path: String,
    /// Externally reachable base URL. Defaults to `http://{local_addr}`.
    pub public_url: Option<String>,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/hive".into(),
            public_url: None,
        }
    }
}

/// The request a dynamic callback sees.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub id: String,
    pub query: Option<String>,
    pub remote_addr: SocketAddr,
}

/// What a dynamic callback answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResponse {
    /// 200 with a plain-text body.
    Body(String),
    /// 307 to another location.
    Redirect(String),
    /// Any other status with a body.
    Status(u16, String),
}

impl IntoResponse for CallbackResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Body(body) => body.into_response(),
            Self::Redirect(location) => Redirect::temporary(&location).into_response(),
            Self::Status(code, body) => {
                let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (code, body).into_response()
            }
        }
    }
}

/// A registered callback: either a fixed body or a function of the request.
#[derive(Clone)]
pub enum UrlCallback {
    Static(String),
    Dynamic(Arc<dyn Fn(&CallbackRequest) -> CallbackResponse + Send + Sync>),
}

impl UrlCallback {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&CallbackRequest) -> CallbackResponse + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }
}

impl From<String> for UrlCallback {
    fn from(body: String) -> Self {
        Self::Static(body)
    }
}

impl From<&str> for UrlCallback {
    fn from(body: &str) -> Self {
        Self::Static(body.to_string())
    }
}

impl std::fmt::Debug for UrlCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(body) => f.debug_tuple("Static").field(body).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Shared state for the callback routes.
struct CallbackState {
    callbacks: Mutex<HashMap<String, UrlCallback>>,
}

/// An HTTP endpoint serving single-use callback URLs.
#[derive(Clone)]
pub struct CallbackServer {
    state: Arc<CallbackState>,
    base_url: String,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl CallbackServer {
    /// Binds the listener and starts serving in the background.
    pub async fn bind(config: CallbackServerConfig) -> TransportResult<Self> {
        if !config.path.starts_with('/') {
            return Err(TransportError::InvalidConfig(format!(
                "callback path must start with '/': {}",
                config.path
            )));
        }
        let prefix = config.path.trim_end_matches('/').to_string();

        let state = Arc::new(CallbackState {
            callbacks: Mutex::new(HashMap::new()),
        });

        let router = Router::new()
            .route(&format!("{prefix}/{{id}}"), get(serve_callback))
            .fallback(fallback)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;

        let root = config
            .public_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{local_addr}"));
        let base_url = format!("{root}{prefix}");

        info!(addr = %local_addr, url = %base_url, "Callback endpoint listening");

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            );

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "Callback endpoint error");
                    }
                }
                _ = token.cancelled() => {
                    info!("Callback endpoint shutting down");
                }
            }
        });

        Ok(Self {
            state,
            base_url,
            local_addr,
            shutdown,
        })
    }

    /// Registers a callback and returns the URL that triggers it once.
    pub fn register(&self, callback: impl Into<UrlCallback>) -> String {
        let mut callbacks = self.state.callbacks.lock();
        let id = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !callbacks.contains_key(&candidate) {
                break candidate;
            }
        };
        callbacks.insert(id.clone(), callback.into());
        debug!(id = %id, pending = callbacks.len(), "Registered callback URL");

        format!("{}/{}", self.base_url, id)
    }

    /// Number of URLs issued but not yet used.
    pub fn pending(&self) -> usize {
        self.state.callbacks.lock().len()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops serving. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("base_url", &self.base_url)
            .field("pending", &self.pending())
            .finish()
    }
}

async fn serve_callback(
    State(state): State<Arc<CallbackState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    if NOT_FOUND_IDS.contains(&id.as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let callback = state.callbacks.lock().remove(&id);
    match callback {
        Some(UrlCallback::Static(body)) => {
            debug!(id = %id, remote_addr = %remote_addr, "Serving static callback");
            body.into_response()
        }
        Some(UrlCallback::Dynamic(f)) => {
            debug!(id = %id, remote_addr = %remote_addr, "Serving dynamic callback");
            let request = CallbackRequest {
                id,
                query,
                remote_addr,
            };
            f(&request).into_response()
        }
        None => {
            debug!(id = %id, "Request for unused callback URL");
            UNUSED_URL_BODY.into_response()
        }
    }
}

async fn fallback(uri: axum::http::Uri) -> Response {
    if uri.path().ends_with("/favicon.ico") {
        return StatusCode::NOT_FOUND.into_response();
    }
    UNUSED_URL_BODY.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    /// GETs `url` without following redirects. Returns (status, body).
    async fn fetch(url: &str) -> (u16, String) {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap();
        let response = client.get(url).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    #[tokio::test]
    async fn test_static_callback_is_single_use() {
        let server = CallbackServer::bind(CallbackServerConfig::default())
            .await
            .unwrap();
        let url = server.register("thanks for clicking");
        assert!(url.starts_with(server.base_url()));
        assert_eq!(server.pending(), 1);

        let (status, body) = fetch(&url).await;
        assert_eq!(status, 200);
        assert_eq!(body, "thanks for clicking");
        assert_eq!(server.pending(), 0);

        let (_, body) = fetch(&url).await;
        assert_eq!(body, UNUSED_URL_BODY);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_dynamic_callback_sees_query() {
        let server = CallbackServer::bind(CallbackServerConfig::default())
            .await
            .unwrap();
        let url = server.register(UrlCallback::dynamic(|req| {
            CallbackResponse::Body(format!("q={}", req.query.as_deref().unwrap_or("")))
        }));

        let (status, body) = fetch(&format!("{url}?x=1")).await;
        assert_eq!(status, 200);
        assert_eq!(body, "q=x=1");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_redirect_callback() {
        let server = CallbackServer::bind(CallbackServerConfig::default())
            .await
            .unwrap();
        let url = server.register(UrlCallback::dynamic(|_| {
            CallbackResponse::Redirect("https://example.com/".into())
        }));

        let (status, _) = fetch(&url).await;
        assert_eq!(status, 307);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_and_favicon() {
        let server = CallbackServer::bind(CallbackServerConfig::default())
            .await
            .unwrap();
        let root = format!("http://{}", server.local_addr());

        let (status, body) = fetch(&format!("{root}/hive/deadbeef")).await;
        assert_eq!(status, 200);
        assert_eq!(body, UNUSED_URL_BODY);

        let (status, _) = fetch(&format!("{root}/hive/favicon.ico")).await;
        assert_eq!(status, 404);
        let (status, _) = fetch(&format!("{root}/favicon.ico")).await;
        assert_eq!(status, 404);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let server = CallbackServer::bind(CallbackServerConfig::default())
            .await
            .unwrap();
        let urls: std::collections::HashSet<_> =
            (0..100).map(|_| server.register("x")).collect();
        assert_eq!(urls.len(), 100);
        assert_eq!(server.pending(), 100);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_public_url_and_path_validation() {
        let server = CallbackServer::bind(CallbackServerConfig {
            public_url: Some("https://bots.example.com/".into()),
            path: "/cb/".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(server.base_url(), "https://bots.example.com/cb");
        server.shutdown();

        let err = CallbackServer::bind(CallbackServerConfig {
            path: "cb".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
    }
}

//! HTTP server exposing the relay endpoints.
//!
//! | Route | Upstream |
//! |-------|----------|
//! | `POST /v1/chat/completions` | `POST {base}/chat/completions` |
//! | `POST /v1/async/chat/completions` | `POST {base}/async/chat/completions` |
//! | `GET /v1/async/chat/completions/{id}` | `GET {base}/async/chat/completions/{id}` |
//! | `GET /healthz` | none |

use crate::cancel::CancellationToken;
use crate::config::ClientConfig;
use crate::relay::{error_response, relay_response};
use crate::transport::http::{ASYNC_COMPLETIONS_PATH, COMPLETIONS_PATH};
use crate::transport::{Credential, HttpTransport};
use crate::{Error, Result};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use reqwest::Method;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub client: ClientConfig,
}

#[derive(Clone)]
pub struct RelayState {
    transport: Arc<HttpTransport>,
    shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(transport: Arc<HttpTransport>, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            shutdown,
        }
    }
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/async/chat/completions", post(submit_async))
        .route("/v1/async/chat/completions/{id}", get(async_status))
        .with_state(state)
}

pub struct RelayServer {
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Serve until `shutdown` trips. In-flight relays are cut at their next
    /// chunk because every request token is a child of `shutdown`.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let transport = Arc::new(HttpTransport::new(self.config.client.clone())?);
        let app = build_router(RelayState::new(transport, shutdown.clone()));

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            upstream = self.config.client.base_url.as_str(),
            "relay listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("relay stopped");
        Ok(())
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn chat_completions(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    let accept_stream = wants_stream(&headers, &body);
    relay(&state, &headers, Method::POST, COMPLETIONS_PATH, Some(body), accept_stream).await
}

async fn submit_async(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    relay(&state, &headers, Method::POST, ASYNC_COMPLETIONS_PATH, Some(body), false).await
}

async fn async_status(
    State(state): State<RelayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = format!("{}/{}", ASYNC_COMPLETIONS_PATH, id);
    relay(&state, &headers, Method::GET, &path, None, false).await
}

async fn relay(
    state: &RelayState,
    headers: &HeaderMap,
    method: Method,
    path: &str,
    body: Option<Bytes>,
    accept_stream: bool,
) -> Response {
    let credential = match state
        .transport
        .resolve_credential(caller_credential(headers).as_ref())
    {
        Ok(c) => c,
        Err(e) => return failure(e),
    };

    let token = state.shutdown.child_token();
    match state
        .transport
        .forward(method, path, body, &credential, accept_stream)
        .await
    {
        Ok(upstream) => relay_response(upstream, token).await,
        Err(e) => failure(e),
    }
}

/// `Authorization` is forwarded verbatim; `x-api-key` becomes a bearer token.
pub fn caller_credential(headers: &HeaderMap) -> Option<Credential> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(auth) = read(header::AUTHORIZATION.as_str()) {
        return Some(Credential::authorization(auth));
    }
    read(API_KEY_HEADER).map(Credential::api_key)
}

// Streaming is requested by the body's `stream` flag or an explicit Accept.
fn wants_stream(headers: &HeaderMap, body: &Bytes) -> bool {
    let accepts_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("text/event-stream"));
    accepts_sse
        || serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("stream").and_then(Value::as_bool))
            .unwrap_or(false)
}

fn failure(err: Error) -> Response {
    let (status, kind) = match &err {
        Error::MissingCredential => (StatusCode::UNAUTHORIZED, "missing_credential"),
        Error::Configuration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        _ => (StatusCode::BAD_GATEWAY, "upstream_unreachable"),
    };
    warn!(http_status = status.as_u16(), error = %err, "relay request failed");
    error_response(status, kind, &err.to_string())
}

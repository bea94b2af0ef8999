use crate::config::ClientConfig;
use crate::payload::RequestPayload;
use crate::transport::TransportError;
use crate::types::job::AsyncJob;
use crate::{Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Proxy};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const COMPLETIONS_PATH: &str = "/chat/completions";
pub const ASYNC_COMPLETIONS_PATH: &str = "/async/chat/completions";
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-client-request-id";

/// A caller-supplied credential, forwarded upstream as-is.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Bare API key; sent as `Authorization: Bearer <key>`.
    ApiKey(String),
    /// A complete `Authorization` header value, forwarded verbatim.
    Authorization(String),
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Credential::ApiKey(key.into())
    }

    pub fn authorization(value: impl Into<String>) -> Self {
        Credential::Authorization(value.into())
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let raw = match self {
            Credential::ApiKey(key) => format!("Bearer {}", key.trim()),
            Credential::Authorization(value) => value.clone(),
        };
        let mut value = HeaderValue::from_str(&raw).map_err(|_| {
            Error::Transport(TransportError::Other(
                "credential is not a valid header value".to_string(),
            ))
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

// Never print the secret.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey(***)"),
            Credential::Authorization(_) => f.write_str("Credential::Authorization(***)"),
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(
                env::var("SONAR_HTTP_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(10),
            ))
            .pool_max_idle_per_host(
                env::var("SONAR_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Streams can stay open for minutes.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    "invalid proxy url",
                    crate::ErrorContext::new()
                        .with_field_path("proxy_url")
                        .with_details(e.to_string())
                        .with_source("http_transport"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Credential to use: the explicit one, else the configured API key.
    pub fn resolve_credential(&self, explicit: Option<&Credential>) -> Result<Credential> {
        if let Some(c) = explicit {
            return Ok(c.clone());
        }
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(Credential::api_key)
            .ok_or(Error::MissingCredential)
    }

    /// Send a request and hand back the raw response, whatever its status.
    ///
    /// The body is forwarded untouched; the relay uses this to stay a pure
    /// transport layer.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        credential: &Credential,
        accept_stream: bool,
    ) -> Result<reqwest::Response> {
        let url = self.config.endpoint(path);
        let client_request_id = Uuid::new_v4().to_string();

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header(AUTHORIZATION, credential.header_value()?)
            .header(CLIENT_REQUEST_ID_HEADER, client_request_id.as_str());

        if accept_stream {
            req = req.header("accept", "text/event-stream");
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let start = std::time::Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        info!(
            http_status = resp.status().as_u16(),
            method = method.as_str(),
            path,
            client_request_id = client_request_id.as_str(),
            duration_ms = start.elapsed().as_millis(),
            "upstream responded"
        );

        Ok(resp)
    }

    /// POST a completion request. Non-success statuses become `Error::Upstream`.
    pub async fn send_completion(
        &self,
        payload: &RequestPayload,
        credential: &Credential,
    ) -> Result<reqwest::Response> {
        let body = Bytes::from(serde_json::to_vec(payload)?);
        let resp = self
            .forward(
                Method::POST,
                COMPLETIONS_PATH,
                Some(body),
                credential,
                payload.is_streaming(),
            )
            .await?;
        ensure_success(resp).await
    }

    pub async fn submit_job(
        &self,
        payload: &RequestPayload,
        credential: &Credential,
    ) -> Result<AsyncJob> {
        let body = Bytes::from(serde_json::to_vec(&payload.as_async_submission())?);
        let resp = self
            .forward(
                Method::POST,
                ASYNC_COMPLETIONS_PATH,
                Some(body),
                credential,
                false,
            )
            .await?;
        read_json(ensure_success(resp).await?).await
    }

    pub async fn fetch_job(&self, job_id: &str, credential: &Credential) -> Result<AsyncJob> {
        let path = format!("{}/{}", ASYNC_COMPLETIONS_PATH, job_id);
        let resp = self
            .forward(Method::GET, &path, None, credential, false)
            .await?;
        read_json(ensure_success(resp).await?).await
    }
}

/// Turn a non-success response into `Error::Upstream` with the body verbatim.
pub async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let raw = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(http_status = status, error = %e, "upstream error body read failed");
            Bytes::new()
        }
    };
    let body = match String::from_utf8(raw.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            debug!(http_status = status, "upstream error body is not UTF-8");
            String::from_utf8_lossy(&raw).into_owned()
        }
    };
    Err(Error::Upstream { status, body })
}

pub async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Transport(TransportError::Http(e)))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
}

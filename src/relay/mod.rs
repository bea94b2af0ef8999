//! Upstream response relay.
//!
//! Status, allow-listed headers and body are forwarded without decoding.
//! Success bodies are streamed chunk by chunk; at most one read buffer is held
//! at a time.

pub mod server;

use crate::cancel::CancellationToken;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde_json::json;
use std::io;
use std::pin::Pin;
use tracing::{debug, warn};

pub use server::{build_router, RelayConfig, RelayServer, RelayState};

const FORWARDED_HEADERS: &[&str] = &[
    "content-type",
    "cache-control",
    "x-request-id",
    "request-id",
    "retry-after",
];
const FORWARDED_PREFIXES: &[&str] = &["x-ratelimit-", "ratelimit-"];

type UpstreamChunks = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Whether an upstream response header is passed on to the caller.
pub fn is_forwarded_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    FORWARDED_HEADERS.contains(&name.as_str())
        || FORWARDED_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn forwarded_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if !is_forwarded_header(name.as_str()) {
            continue;
        }
        // reqwest and axum sit on different `http` majors; go through bytes.
        match (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(n), Ok(v)) => {
                out.append(n, v);
            }
            _ => debug!(header = name.as_str(), "dropping unconvertible header"),
        }
    }
    out
}

fn has_streamable_body(status: StatusCode) -> bool {
    status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && !status.is_informational()
}

/// Forward `upstream` to the caller.
///
/// Non-success responses and responses without a streamable body are read in
/// full and sent at once. Success bodies are streamed; the token is checked
/// before each chunk is handed on, and a tripped token ends the body.
pub async fn relay_response(upstream: reqwest::Response, token: CancellationToken) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = forwarded_headers(upstream.headers());

    if !status.is_success() || !has_streamable_body(status) {
        let body = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(http_status = status.as_u16(), error = %e, "upstream body read failed");
                Bytes::new()
            }
        };
        return assemble(status, headers, Body::from(body));
    }

    let chunks: UpstreamChunks = Box::pin(
        upstream
            .bytes_stream()
            .map(|r| r.map_err(|e| io::Error::new(io::ErrorKind::Other, e))),
    );
    stream_body(status, headers, chunks, token).await
}

async fn stream_body(
    status: StatusCode,
    headers: HeaderMap,
    mut chunks: UpstreamChunks,
    token: CancellationToken,
) -> Response {
    let first = match chunks.next().await {
        None => return assemble(status, headers, Body::empty()),
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => {
            // Nothing has been committed yet, so the caller can still get a
            // complete error response.
            warn!(error = %e, bytes_forwarded = 0u64, "upstream stream failed before first chunk");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_stream_error",
                &e.to_string(),
            );
        }
    };

    let body = Body::from_stream(relay_chunks(first, chunks, token));
    assemble(status, headers, body)
}

struct ChunkRelay {
    pending: Option<Bytes>,
    rest: UpstreamChunks,
    token: CancellationToken,
    forwarded: u64,
}

fn relay_chunks(
    first: Bytes,
    rest: UpstreamChunks,
    token: CancellationToken,
) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let state = ChunkRelay {
        pending: Some(first),
        rest,
        token,
        forwarded: 0,
    };
    stream::unfold(state, |mut st| async move {
        let chunk = match st.pending.take() {
            Some(chunk) => chunk,
            None => match st.rest.next().await {
                None => return None,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(
                        error = %e,
                        bytes_forwarded = st.forwarded,
                        "upstream stream failed mid-body, ending relay"
                    );
                    return None;
                }
            },
        };
        if st.token.is_cancelled() {
            debug!(bytes_forwarded = st.forwarded, "relay cancelled");
            return None;
        }
        st.forwarded += chunk.len() as u64;
        Some((Ok::<_, io::Error>(chunk), st))
    })
}

fn assemble(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

/// JSON error body in the upstream's own error shape.
pub fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = json!({"error": {"type": kind, "message": message, "code": status.as_u16()}});
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

//! Relay server against a mock upstream, driven through `oneshot`

use crate::mock_server::MockUpstream;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sonar_relay::cancel::CancellationToken;
use sonar_relay::relay::{build_router, RelayState};
use sonar_relay::transport::HttpTransport;
use std::sync::Arc;
use tower::ServiceExt;

const SSE_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: [DONE]\n\n",
);

fn router_for(upstream: &MockUpstream) -> Router {
    let transport = HttpTransport::new(upstream.client_config()).unwrap();
    build_router(RelayState::new(Arc::new(transport), CancellationToken::new()))
}

fn completion_request(auth: Option<(&str, &str)>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some((name, value)) = auth {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn streams_upstream_body_verbatim_with_allowed_headers() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer caller")
        .match_header("accept", "text/event-stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_header("x-ratelimit-remaining-requests", "49")
        .with_header("set-cookie", "session=secret")
        .with_body(SSE_BODY)
        .create_async()
        .await;

    let app = router_for(&upstream);
    let resp = app
        .oneshot(completion_request(
            Some(("authorization", "Bearer caller")),
            r#"{"model":"sonar","stream":true,"messages":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["x-ratelimit-remaining-requests"], "49");
    assert!(resp.headers().get("set-cookie").is_none());

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], SSE_BODY.as_bytes());
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_credential_is_401_without_upstream_call() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let app = router_for(&upstream);
    let resp = app
        .oneshot(completion_request(None, r#"{"model":"sonar"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["type"], "missing_credential");
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_and_body_are_forwarded() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("retry-after", "7")
        .with_body(r#"{"error":{"message":"slow down"}}"#)
        .create_async()
        .await;

    let app = router_for(&upstream);
    let resp = app
        .oneshot(completion_request(
            Some(("authorization", "Bearer caller")),
            r#"{"model":"sonar"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers()["retry-after"], "7");
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"error":{"message":"slow down"}}"#);
}

#[tokio::test]
async fn api_key_header_is_sent_as_bearer() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/async/chat/completions")
        .match_header("authorization", "Bearer k2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"job-1","status":"CREATED"}"#)
        .create_async()
        .await;

    let app = router_for(&upstream);
    let req = Request::builder()
        .method("POST")
        .uri("/v1/async/chat/completions")
        .header("x-api-key", "k2")
        .body(Body::from(r#"{"request":{"model":"sonar"}}"#))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "job-1");
    mock.assert_async().await;
}

#[tokio::test]
async fn job_status_route_forwards_get() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .mock_json(
            "GET",
            "/async/chat/completions/job-9",
            200,
            r#"{"id":"job-9","status":"IN_PROGRESS"}"#,
        )
        .await;

    let app = router_for(&upstream);
    let req = Request::builder()
        .method("GET")
        .uri("/v1/async/chat/completions/job-9")
        .header("authorization", "Bearer caller")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"id":"job-9","status":"IN_PROGRESS"}"#);
    mock.assert_async().await;
}

#[tokio::test]
async fn healthz_answers_without_upstream() {
    let upstream = MockUpstream::new().await;
    let app = router_for(&upstream);
    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn shutdown_token_ends_streamed_body() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream.mock_sse("/chat/completions", &["{}", "[DONE]"]).await;

    let shutdown = CancellationToken::new();
    let transport = HttpTransport::new(upstream.client_config()).unwrap();
    let app = build_router(RelayState::new(Arc::new(transport), shutdown.clone()));
    shutdown.cancel();

    let resp = app
        .oneshot(completion_request(
            Some(("authorization", "Bearer caller")),
            r#"{"stream":true}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

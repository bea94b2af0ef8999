//! Client and session against a mock upstream

use crate::mock_server::{MockUpstream, TEST_KEY};
use mockito::Matcher;
use serde_json::json;
use sonar_relay::cancel::CancellationToken;
use sonar_relay::payload::build_payload;
use sonar_relay::transport::{Credential, HttpTransport};
use sonar_relay::types::job::JobStatus;
use sonar_relay::{ExchangeStatus, Message, MessageRole, SearchConfig, Session, SonarClient};
use tokio::sync::watch;

#[tokio::test]
async fn streaming_session_merges_events_and_records_history() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .match_header("authorization", format!("Bearer {}", TEST_KEY).as_str())
        .match_body(Matcher::PartialJson(json!({"model": "sonar", "stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            ": keep-alive\n\n",
            "data: {\"id\":\"r1\",\"choices\":[{\"delta\":{\"content\":\"Ferris \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"is a crab.\"}}],\"citations\":[\"https://rustacean.net\"]}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;

    let mut session = Session::new(upstream.client(), SearchConfig::default());
    let rx = session.subscribe();
    let result = session.send("Who is Ferris?").await;
    mock.assert_async().await;

    assert_eq!(result.status, ExchangeStatus::Completed);
    assert_eq!(result.content, "Ferris is a crab.");
    assert_eq!(result.id.as_deref(), Some("r1"));
    assert_eq!(result.citations, Some(vec!["https://rustacean.net".to_string()]));
    assert_eq!(*rx.borrow(), result);

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].text(), "Ferris is a crab.");
}

#[tokio::test]
async fn non_streaming_session_merges_final_payload() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream
        .mock_json(
            "POST",
            "/chat/completions",
            200,
            r#"{"id":"r2","model":"sonar","choices":[{"message":{"role":"assistant","content":"42"},"finish_reason":"stop"}],"related_questions":["Why 42?"]}"#,
        )
        .await;

    let config = SearchConfig {
        stream: false,
        ..SearchConfig::default()
    };
    let mut session = Session::new(upstream.client(), config);
    let result = session.send("meaning of life").await;

    assert_eq!(result.status, ExchangeStatus::Completed);
    assert_eq!(result.content, "42");
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    assert_eq!(result.related_questions, Some(vec!["Why 42?".to_string()]));
}

#[tokio::test]
async fn upstream_error_is_recorded_with_body_verbatim() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream
        .mock_json(
            "POST",
            "/chat/completions",
            429,
            r#"{"error":{"message":"rate limited"}}"#,
        )
        .await;

    let mut session = Session::new(upstream.client(), SearchConfig::default());
    let result = session.send("hello").await;

    assert_eq!(result.status, ExchangeStatus::Failed);
    let error = result.error.unwrap();
    assert!(error.contains("429"));
    assert!(error.contains(r#"{"error":{"message":"rate limited"}}"#));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn missing_credential_makes_no_upstream_call() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let client = SonarClient::new(upstream.client_config()).unwrap();
    let payload = build_payload(&SearchConfig::default(), &[Message::user("hi")]);
    let err = client.complete(&payload, None).await.unwrap_err();

    assert!(matches!(err, sonar_relay::Error::MissingCredential));
    assert_eq!(err.http_status(), Some(401));
    mock.assert_async().await;
}

#[tokio::test]
async fn explicit_credential_overrides_configured_key() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer caller-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"ok"}}]}"#)
        .create_async()
        .await;

    let config = SearchConfig {
        stream: false,
        ..SearchConfig::default()
    };
    let mut session = Session::new(upstream.client(), config)
        .with_credential(Credential::api_key("caller-key"));
    let result = session.send("hi").await;

    mock.assert_async().await;
    assert_eq!(result.content, "ok");
}

#[tokio::test]
async fn async_session_submits_and_polls_until_completed() {
    let mut upstream = MockUpstream::new().await;
    let submit = upstream
        .server
        .mock("POST", "/async/chat/completions")
        .match_body(Matcher::PartialJson(json!({"request": {"model": "sonar-deep-research"}})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"job-7","status":"CREATED"}"#)
        .create_async()
        .await;
    let _status = upstream
        .mock_json(
            "GET",
            "/async/chat/completions/job-7",
            200,
            r#"{"id":"job-7","status":"COMPLETED","response":{"choices":[{"message":{"content":"deep answer"}}],"citations":["https://a.example"]}}"#,
        )
        .await;

    let mut session = Session::new(upstream.client(), SearchConfig::new("sonar-deep-research"));
    let result = session.send_async("research this").await;
    submit.assert_async().await;

    assert_eq!(result.status, ExchangeStatus::Completed);
    assert_eq!(result.content, "deep answer");
    assert_eq!(result.citations, Some(vec!["https://a.example".to_string()]));
    assert!(result.async_status.is_none());
}

#[tokio::test]
async fn streaming_run_cancelled_before_send_merges_nothing() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream
        .mock_sse(
            "/chat/completions",
            &[r#"{"choices":[{"delta":{"content":"never"}}]}"#, "[DONE]"],
        )
        .await;

    let client = upstream.client();
    let payload = build_payload(&SearchConfig::default(), &[Message::user("hi")]);
    let token = CancellationToken::new();
    token.cancel();
    let (tx, rx) = watch::channel(Default::default());

    let err = client
        .run_streaming(&payload, None, &token, &tx)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(rx.borrow().content.is_empty());
}

#[tokio::test]
async fn status_body_without_id_completes_the_job() {
    let mut upstream = MockUpstream::new().await;
    let _submit = upstream
        .mock_json(
            "POST",
            "/async/chat/completions",
            200,
            r#"{"id":"job-8","status":"CREATED"}"#,
        )
        .await;
    let _status = upstream
        .mock_json(
            "GET",
            "/async/chat/completions/job-8",
            200,
            r#"{"status":"COMPLETED","response":{"choices":[{"message":{"content":"ok"}}]}}"#,
        )
        .await;

    let transport = HttpTransport::new(upstream.client_config()).unwrap();
    let job = transport
        .fetch_job("job-8", &Credential::api_key(TEST_KEY))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.id.is_empty());

    let mut session = Session::new(upstream.client(), SearchConfig::new("sonar-deep-research"));
    let result = session.send_async("research this").await;

    assert_eq!(result.status, ExchangeStatus::Completed);
    assert_eq!(result.content, "ok");
}

#[tokio::test]
async fn upstream_error_body_keeps_non_ascii_text() {
    let mut upstream = MockUpstream::new().await;
    let _mock = upstream
        .mock_json(
            "POST",
            "/chat/completions",
            503,
            r#"{"error":{"message":"überlastet ✓"}}"#,
        )
        .await;

    let client = upstream.client();
    let payload = build_payload(&SearchConfig::default(), &[Message::user("hi")]);
    let err = client.complete(&payload, None).await.unwrap_err();

    match err {
        sonar_relay::Error::Upstream { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, r#"{"error":{"message":"überlastet ✓"}}"#);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

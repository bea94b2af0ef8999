//! Mock upstream setup for integration tests

use mockito::{Mock, Server, ServerGuard};
use sonar_relay::config::ClientConfig;
use sonar_relay::SonarClient;
use std::time::Duration;

pub const TEST_KEY: &str = "pplx-test";

/// Test fixture that owns a mock upstream
pub struct MockUpstream {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockUpstream {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url).with_poll_interval(Duration::from_millis(10))
    }

    /// Client pointed at the mock, authenticated with `TEST_KEY`
    pub fn client(&self) -> SonarClient {
        SonarClient::builder()
            .base_url(&self.base_url)
            .api_key(TEST_KEY)
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    /// A successful event-stream response built from `data:` payloads
    pub async fn mock_sse(&mut self, path: &str, payloads: &[&str]) -> Mock {
        let body = payloads
            .iter()
            .map(|p| format!("data: {}\n\n", p))
            .collect::<String>();
        self.server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }

    pub async fn mock_json(&mut self, method: &str, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }
}

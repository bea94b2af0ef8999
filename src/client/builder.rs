use crate::client::core::SonarClient;
use crate::config::ClientConfig;
use crate::pipeline::decode::SseDecoder;
use crate::transport::HttpTransport;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder for clients with non-default settings.
///
/// Starts from [`ClientConfig::default`]; call [`SonarClientBuilder::from_env`]
/// to start from the environment instead.
pub struct SonarClientBuilder {
    config: ClientConfig,
    done_signal: Option<String>,
}

impl Default for SonarClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SonarClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            done_signal: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            config: ClientConfig::from_env()?,
            done_signal: None,
        })
    }

    /// Override base URL (mock servers in tests, regional endpoints).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Delay between async job status fetches.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(proxy_url.into());
        self
    }

    /// Payload that ends a stream early. Defaults to `[DONE]`.
    pub fn done_signal(mut self, signal: impl Into<String>) -> Self {
        self.done_signal = Some(signal.into());
        self
    }

    pub fn build(self) -> Result<SonarClient> {
        let transport = HttpTransport::new(self.config)?;
        let decoder = match self.done_signal {
            Some(signal) => SseDecoder::new().with_done_signal(signal),
            None => SseDecoder::new(),
        };
        Ok(SonarClient {
            transport: Arc::new(transport),
            decoder,
        })
    }
}

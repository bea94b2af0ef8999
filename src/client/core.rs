use crate::config::ClientConfig;
use crate::payload::RequestPayload;
use crate::pipeline::decode::SseDecoder;
use crate::pipeline::Decoder;
use crate::transport::{Credential, HttpTransport, TransportError};
use crate::types::events::ProtocolEvent;
use crate::{BoxStream, Error, Result};
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Client for one upstream API, shared across sessions.
pub struct SonarClient {
    pub(crate) transport: Arc<HttpTransport>,
    pub(crate) decoder: SseDecoder,
}

/// What a completion call answered with.
pub enum CompletionBody {
    /// `text/event-stream`: decoded lazily.
    Events(BoxStream<'static, ProtocolEvent>),
    /// A single JSON document.
    Json(Value),
}

impl SonarClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(HttpTransport::new(config)?),
            decoder: SseDecoder::new(),
        })
    }

    pub fn builder() -> crate::client::builder::SonarClientBuilder {
        crate::client::builder::SonarClientBuilder::new()
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }

    pub fn poll_interval(&self) -> Duration {
        self.transport.config().poll_interval
    }

    /// POST a completion and return its body, decoded as events when the
    /// upstream streams.
    ///
    /// Fails with `MissingCredential` before any network activity when neither
    /// `credential` nor the configured API key is available.
    pub async fn send(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
    ) -> Result<CompletionBody> {
        let credential = self.transport.resolve_credential(credential)?;
        let resp = self.transport.send_completion(payload, &credential).await?;

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            let bytes: BoxStream<'static, bytes::Bytes> = Box::pin(
                resp.bytes_stream()
                    .map_err(|e| Error::Transport(TransportError::Http(e))),
            );
            Ok(CompletionBody::Events(self.decoder.decode_stream(bytes)))
        } else {
            Ok(CompletionBody::Json(
                crate::transport::http::read_json(resp).await?,
            ))
        }
    }

    /// Streaming completion as a lazy event sequence.
    pub async fn stream_events(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
    ) -> Result<BoxStream<'static, ProtocolEvent>> {
        match self.send(payload, credential).await? {
            CompletionBody::Events(events) => Ok(events),
            // Upstream ignored `stream: true`; present the body as one event.
            CompletionBody::Json(v) => {
                let events: Vec<Result<ProtocolEvent>> =
                    vec![Ok(ProtocolEvent::Data(v)), Ok(ProtocolEvent::Done)];
                Ok(Box::pin(futures::stream::iter(events)))
            }
        }
    }

    /// Non-streaming completion as one JSON document.
    pub async fn complete(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
    ) -> Result<Value> {
        match self.send(payload, credential).await? {
            CompletionBody::Json(v) => Ok(v),
            CompletionBody::Events(_) => Err(Error::Decode(
                "expected a JSON body but upstream answered with an event stream".to_string(),
            )),
        }
    }
}

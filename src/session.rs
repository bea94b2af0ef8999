//! Conversation-scoped exchange driver.
//!
//! A session owns the history, the search configuration, the cancel slot and
//! the channel that the next exchange will publish on. Each exchange takes that
//! channel and installs a fresh one for the one after it, so a receiver from
//! [`Session::subscribe`] follows exactly one exchange and then sees the
//! sender close.

use crate::cancel::CancelSlot;
use crate::client::SonarClient;
use crate::config::SearchConfig;
use crate::payload::{PayloadBuilder, RequestPayload};
use crate::pipeline::accumulate::{ExchangeStatus, ResultAccumulator};
use crate::transport::Credential;
use crate::types::message::Message;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// How an exchange reaches the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Streaming or plain completion, per `SearchConfig::stream`.
    Sync,
    /// Submit a job and poll it.
    Async,
}

pub struct Session {
    client: Arc<SonarClient>,
    config: SearchConfig,
    credential: Option<Credential>,
    history: Vec<Message>,
    cancel: Arc<CancelSlot>,
    next: watch::Sender<ResultAccumulator>,
}

impl Session {
    pub fn new(client: impl Into<Arc<SonarClient>>, config: SearchConfig) -> Self {
        let (next, _) = watch::channel(ResultAccumulator::new());
        Self {
            client: client.into(),
            config,
            credential: None,
            history: Vec::new(),
            cancel: Arc::new(CancelSlot::new()),
            next,
        }
    }

    /// Use `credential` instead of the client's configured API key.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SearchConfig) {
        self.config = config;
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Updates for the next exchange started on this session.
    pub fn subscribe(&self) -> watch::Receiver<ResultAccumulator> {
        self.next.subscribe()
    }

    /// Stop the running exchange, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle for stopping exchanges from another task while `send` runs.
    pub fn cancel_handle(&self) -> Arc<CancelSlot> {
        Arc::clone(&self.cancel)
    }

    /// Run one exchange in `Sync` mode and return its terminal accumulator.
    pub async fn send(&mut self, prompt: impl Into<String>) -> ResultAccumulator {
        self.exchange(Message::user(prompt), ExchangeMode::Sync).await
    }

    /// Run one exchange as an async job and return its terminal accumulator.
    pub async fn send_async(&mut self, prompt: impl Into<String>) -> ResultAccumulator {
        self.exchange(Message::user(prompt), ExchangeMode::Async).await
    }

    /// Run one exchange for an arbitrary user message (e.g. with image blocks).
    pub async fn exchange(&mut self, message: Message, mode: ExchangeMode) -> ResultAccumulator {
        let token = self.cancel.begin();
        let (fresh, _) = watch::channel(ResultAccumulator::new());
        let tx = std::mem::replace(&mut self.next, fresh);

        self.history.push(message);
        let payload = self.payload(mode);

        let outcome = match mode {
            ExchangeMode::Sync if payload.is_streaming() => {
                self.client
                    .run_streaming(&payload, self.credential.as_ref(), &token, &tx)
                    .await
            }
            ExchangeMode::Sync => {
                self.client
                    .run_non_streaming(&payload, self.credential.as_ref(), &token, &tx)
                    .await
            }
            ExchangeMode::Async => self
                .client
                .run_async_job(&payload, self.credential.as_ref(), &token, &tx)
                .await
                .map(|_| ()),
        };

        record_outcome(&tx, outcome);
        let result = tx.borrow().clone();
        self.settle_history(&result);
        result
    }

    fn payload(&self, mode: ExchangeMode) -> RequestPayload {
        let streaming = mode == ExchangeMode::Sync && self.config.stream;
        PayloadBuilder::new(&self.config)
            .messages(self.history.iter().cloned())
            .stream(streaming)
            .build()
    }

    // The upstream expects user/assistant turns to alternate, so a turn that
    // produced no answer is rolled back.
    fn settle_history(&mut self, result: &ResultAccumulator) {
        let answered = matches!(
            result.status,
            ExchangeStatus::Completed | ExchangeStatus::Stopped
        ) && !result.content.is_empty();

        if answered {
            self.history.push(Message::assistant(result.content.clone()));
        } else {
            self.history.pop();
        }
    }
}

/// Write the terminal status of an exchange. Cancellation wins over any
/// other error since a tripped token can surface as a transport failure.
pub fn record_outcome(tx: &watch::Sender<ResultAccumulator>, outcome: Result<()>) {
    match outcome {
        Ok(()) => tx.send_modify(|a| a.complete()),
        Err(Error::Cancelled) => {
            info!("exchange stopped");
            tx.send_modify(|a| a.stop());
        }
        Err(e) => {
            warn!(error = %e, http_status = e.http_status(), "exchange failed");
            tx.send_modify(|a| a.fail(&e));
        }
    }
}

//! Exchange drivers: each runs one request to completion and publishes every
//! intermediate state through the watch channel.
//!
//! Cancellation is cooperative. Each driver checks its token before any
//! accumulator mutation, so once the token trips nothing more is written.

use crate::cancel::{checkpoint, until_cancelled, CancellationToken};
use crate::client::core::{CompletionBody, SonarClient};
use crate::jobs::{AsyncJobPoller, CompletedJob, HttpJobApi};
use crate::payload::RequestPayload;
use crate::pipeline::accumulate::{ExchangeStatus, ResultAccumulator};
use crate::transport::Credential;
use crate::types::events::ProtocolEvent;
use crate::{BoxStream, Error, Result};
use futures::StreamExt;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

impl SonarClient {
    /// Drive a streaming completion into `acc`.
    ///
    /// Falls back to a single final merge when the upstream answers with a
    /// plain JSON body instead of an event stream.
    pub async fn run_streaming(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
        token: &CancellationToken,
        acc: &watch::Sender<ResultAccumulator>,
    ) -> Result<()> {
        checkpoint(token)?;
        let start = Instant::now();
        let body = self.send(payload, credential).await?;
        checkpoint(token)?;
        acc.send_modify(|a| a.status = ExchangeStatus::Streaming);

        let events = match body {
            CompletionBody::Events(events) => events,
            CompletionBody::Json(value) => {
                acc.send_modify(|a| a.merge_final_value(&value));
                info!(
                    model = payload.model(),
                    duration_ms = start.elapsed().as_millis(),
                    "exchange completed without streaming"
                );
                return Ok(());
            }
        };

        let frames = merge_events(events, token, acc).await?;
        info!(
            model = payload.model(),
            frames,
            duration_ms = start.elapsed().as_millis(),
            "stream finished"
        );
        Ok(())
    }

    /// Drive a non-streaming completion into `acc` with one final merge.
    pub async fn run_non_streaming(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
        token: &CancellationToken,
        acc: &watch::Sender<ResultAccumulator>,
    ) -> Result<()> {
        checkpoint(token)?;
        let start = Instant::now();
        let value = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            value = self.complete(payload, credential) => value?,
        };
        checkpoint(token)?;
        acc.send_modify(|a| a.merge_final_value(&value));
        info!(
            model = payload.model(),
            duration_ms = start.elapsed().as_millis(),
            "exchange completed"
        );
        Ok(())
    }

    /// Submit `payload` as an async job and poll it into `acc`.
    pub async fn run_async_job(
        &self,
        payload: &RequestPayload,
        credential: Option<&Credential>,
        token: &CancellationToken,
        acc: &watch::Sender<ResultAccumulator>,
    ) -> Result<CompletedJob> {
        let credential = self.transport.resolve_credential(credential)?;
        checkpoint(token)?;
        acc.send_modify(|a| a.status = ExchangeStatus::Polling);

        let api = HttpJobApi::new(self.transport.clone(), credential);
        let mut poller = AsyncJobPoller::new(&api, self.poll_interval());
        poller.run(payload, token, acc).await
    }
}

/// Merge decoded events into `acc` until `[DONE]`, end of stream or
/// cancellation. Returns the number of merged frames.
async fn merge_events(
    events: BoxStream<'static, ProtocolEvent>,
    token: &CancellationToken,
    acc: &watch::Sender<ResultAccumulator>,
) -> Result<u64> {
    let mut events = until_cancelled(events, token.clone());
    let mut frames: u64 = 0;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            next = events.next() => next,
        };
        match next {
            None => {
                // The guard also ends the stream when a read raced the token.
                checkpoint(token)?;
                break;
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(ProtocolEvent::Done)) => {
                debug!(frames, "done sentinel received");
                break;
            }
            Some(Ok(event)) => {
                frames += 1;
                acc.send_modify(|a| a.merge_protocol_event(&event));
            }
        }
    }
    Ok(frames)
}

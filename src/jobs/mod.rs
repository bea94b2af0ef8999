//! Async job poller.
//!
//! ```text
//! SUBMITTED ──► POLLING ──┬──► COMPLETED
//!                  ▲  │   ├──► FAILED
//!                  └──┘   └──► CANCELLED
//! ```
//!
//! There is no iteration cap: the loop ends on a terminal job status, a
//! transport error, or cancellation. Transport errors are not retried.

use crate::cancel::CancellationToken;
use crate::payload::RequestPayload;
use crate::pipeline::accumulate::ResultAccumulator;
use crate::transport::{Credential, HttpTransport};
use crate::types::job::{AsyncJob, JobStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// The two upstream calls the poller needs.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, payload: &RequestPayload) -> Result<AsyncJob>;
    async fn fetch(&self, job_id: &str) -> Result<AsyncJob>;
}

/// `JobApi` over the HTTP transport with a fixed credential.
pub struct HttpJobApi {
    transport: Arc<HttpTransport>,
    credential: Credential,
}

impl HttpJobApi {
    pub fn new(transport: Arc<HttpTransport>, credential: Credential) -> Self {
        Self {
            transport,
            credential,
        }
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, payload: &RequestPayload) -> Result<AsyncJob> {
        self.transport.submit_job(payload, &self.credential).await
    }

    async fn fetch(&self, job_id: &str) -> Result<AsyncJob> {
        self.transport.fetch_job(job_id, &self.credential).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Submitted,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollerState::Completed | PollerState::Failed | PollerState::Cancelled
        )
    }
}

/// Summary of a job that reached `COMPLETED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub id: String,
    pub polls: u32,
}

pub struct AsyncJobPoller<'a> {
    api: &'a dyn JobApi,
    interval: Duration,
    state: PollerState,
}

impl<'a> AsyncJobPoller<'a> {
    pub fn new(api: &'a dyn JobApi, interval: Duration) -> Self {
        Self {
            api,
            interval,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    fn transition(&mut self, next: PollerState) {
        debug!(from = ?self.state, to = ?next, "async job state");
        self.state = next;
    }

    fn cancelled<T>(&mut self) -> Result<T> {
        self.transition(PollerState::Cancelled);
        Err(Error::Cancelled)
    }

    fn failed<T>(&mut self, err: Error) -> Result<T> {
        self.transition(PollerState::Failed);
        Err(err)
    }

    /// Submit `payload` and poll until the job is terminal.
    ///
    /// The accumulator is only touched while the token is live: a status
    /// response that lands after cancellation is dropped unread.
    pub async fn run(
        &mut self,
        payload: &RequestPayload,
        token: &CancellationToken,
        acc: &watch::Sender<ResultAccumulator>,
    ) -> Result<CompletedJob> {
        if token.is_cancelled() {
            return self.cancelled();
        }

        let job = match self.api.submit(payload).await {
            Ok(job) => job,
            Err(e) => return self.failed(e),
        };
        if token.is_cancelled() {
            return self.cancelled();
        }

        if job.id.trim().is_empty() {
            return self.failed(Error::Decode(
                "async submission response carries no job id".to_string(),
            ));
        }
        // Status responses need not repeat the id; keep polling with this one.
        let job_id = job.id;
        self.transition(PollerState::Submitted);
        info!(job_id = job_id.as_str(), "async job created");
        acc.send_modify(|a| {
            a.set_async_status(format!(
                "Async job {} created, waiting for the result...",
                job_id
            ))
        });

        self.transition(PollerState::Polling);
        let mut polls: u32 = 0;
        loop {
            if token.is_cancelled() {
                return self.cancelled();
            }
            tokio::select! {
                _ = token.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let job = match self.api.fetch(&job_id).await {
                Ok(job) => job,
                Err(e) => return self.failed(e),
            };
            polls = polls.saturating_add(1);
            if token.is_cancelled() {
                return self.cancelled();
            }

            match job.status {
                JobStatus::Failed => {
                    let message = job
                        .error_message
                        .unwrap_or_else(|| "job failed without an error message".to_string());
                    info!(job_id = job_id.as_str(), polls, "async job failed");
                    return self.failed(Error::JobFailed(message));
                }
                JobStatus::Completed => {
                    if let Some(response) = job.response {
                        acc.send_modify(|a| {
                            a.merge_final_value(&response);
                            a.async_status = None;
                        });
                        self.transition(PollerState::Completed);
                        info!(job_id = job_id.as_str(), polls, "async job completed");
                        return Ok(CompletedJob { id: job_id, polls });
                    }
                    acc.send_modify(|a| {
                        a.set_async_status(format!(
                            "Async job {} completed, waiting for the result payload...",
                            job_id
                        ))
                    });
                }
                status => {
                    acc.send_modify(|a| {
                        a.set_async_status(format!("Async job {}: {}", job_id, status))
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::payload::build_payload;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        statuses: Mutex<VecDeque<Result<AsyncJob>>>,
    }

    impl Scripted {
        fn new(statuses: Vec<Result<AsyncJob>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    fn job(status: &str) -> AsyncJob {
        serde_json::from_value(json!({"id": "job-1", "status": status})).unwrap()
    }

    #[async_trait]
    impl JobApi for Scripted {
        async fn submit(&self, _payload: &RequestPayload) -> Result<AsyncJob> {
            Ok(job("CREATED"))
        }

        async fn fetch(&self, _job_id: &str) -> Result<AsyncJob> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(job("IN_PROGRESS")))
        }
    }

    #[tokio::test]
    async fn non_success_fetch_is_fatal() {
        let api = Scripted::new(vec![
            Ok(job("IN_PROGRESS")),
            Err(Error::Upstream {
                status: 503,
                body: "unavailable".into(),
            }),
        ]);
        let payload = build_payload(&SearchConfig::default(), &[]);
        let (tx, rx) = watch::channel(ResultAccumulator::new());
        let mut poller = AsyncJobPoller::new(&api, Duration::from_millis(1));

        let err = poller
            .run(&payload, &CancellationToken::new(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: 503, .. }));
        assert_eq!(poller.state(), PollerState::Failed);
        assert_eq!(
            rx.borrow().async_status.as_deref(),
            Some("Async job job-1: POLLING")
        );
    }

    #[tokio::test]
    async fn failed_job_carries_upstream_message() {
        let mut failed = job("FAILED");
        failed.error_message = Some("quota exceeded".into());
        let api = Scripted::new(vec![Ok(failed)]);
        let payload = build_payload(&SearchConfig::default(), &[]);
        let (tx, _rx) = watch::channel(ResultAccumulator::new());
        let mut poller = AsyncJobPoller::new(&api, Duration::from_millis(1));

        let err = poller
            .run(&payload, &CancellationToken::new(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed(ref m) if m == "quota exceeded"));
        assert_eq!(poller.state(), PollerState::Failed);
    }

    #[tokio::test]
    async fn completed_without_response_keeps_polling() {
        let mut done = job("COMPLETED");
        done.response = Some(json!({"choices": [{"message": {"content": "ok"}}]}));
        let api = Scripted::new(vec![Ok(job("COMPLETED")), Ok(done)]);
        let payload = build_payload(&SearchConfig::default(), &[]);
        let (tx, rx) = watch::channel(ResultAccumulator::new());
        let mut poller = AsyncJobPoller::new(&api, Duration::from_millis(1));

        let completed = poller
            .run(&payload, &CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert_eq!(completed.polls, 2);
        assert_eq!(rx.borrow().content, "ok");
        assert!(rx.borrow().async_status.is_none());
    }

    struct NoIdSubmit;

    #[async_trait]
    impl JobApi for NoIdSubmit {
        async fn submit(&self, _payload: &RequestPayload) -> Result<AsyncJob> {
            Ok(serde_json::from_value(json!({"status": "CREATED"})).unwrap())
        }

        async fn fetch(&self, _job_id: &str) -> Result<AsyncJob> {
            unreachable!("no job id to poll")
        }
    }

    #[tokio::test]
    async fn submission_without_id_fails() {
        let payload = build_payload(&SearchConfig::default(), &[]);
        let (tx, rx) = watch::channel(ResultAccumulator::new());
        let mut poller = AsyncJobPoller::new(&NoIdSubmit, Duration::from_millis(1));

        let err = poller
            .run(&payload, &CancellationToken::new(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(poller.state(), PollerState::Failed);
        assert!(rx.borrow().async_status.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_submit_does_nothing() {
        let api = Scripted::new(vec![]);
        let payload = build_payload(&SearchConfig::default(), &[]);
        let (tx, rx) = watch::channel(ResultAccumulator::new());
        let token = CancellationToken::new();
        token.cancel();
        let mut poller = AsyncJobPoller::new(&api, Duration::from_millis(1));

        let err = poller.run(&payload, &token, &tx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(poller.state(), PollerState::Cancelled);
        assert_eq!(*rx.borrow(), ResultAccumulator::new());
    }
}

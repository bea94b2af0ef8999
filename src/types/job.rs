//! Async job wire types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Upstream job status.
///
/// Servers spell the non-terminal states differently (`CREATED`, `IN_PROGRESS`,
/// ...); every spelling we know is mapped onto the four states the poller cares
/// about. Anything else is kept verbatim and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Polling => "POLLING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" | "CREATED" | "QUEUED" => JobStatus::Submitted,
            "POLLING" | "IN_PROGRESS" | "PENDING" | "RUNNING" => JobStatus::Polling,
            "COMPLETED" | "SUCCEEDED" => JobStatus::Completed,
            "FAILED" | "ERROR" => JobStatus::Failed,
            _ => JobStatus::Other(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status document returned by both the submit and the status endpoints.
///
/// Only the submit response is guaranteed to carry `id`; status responses may
/// omit it, in which case it deserializes empty. `response`, once present on a
/// completed job, has the same shape as a non-streaming completion body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJob {
    #[serde(default)]
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

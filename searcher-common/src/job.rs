//! Job records and the state transitions a job may go through.
//!
//! Modeled on `hook_common::pgqueue::Job`/`NewJob`/`JobStatus`, but the
//! payload shape is fixed (a prompt dispatch), so the type is concrete
//! rather than generic over `J`, and the backing store is the persistence
//! adapter (§4.A) instead of a SQL row.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseJobStatusError {
    #[error("{0} is not a valid JobStatus")]
    Invalid(String),
}

/// Enumeration of possible statuses for a job. See spec.md §3 for the state
/// machine: `pending -> processing -> {completed|failed}`, with
/// `processing -> pending` permitted on stall or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(ParseJobStatusError::Invalid(invalid.to_owned())),
        }
    }
}

/// The result of a successfully completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    pub json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    pub used_worker: usize,
}

/// Opaque progress snapshot published by the dispatcher, best-effort and
/// last-write-wins; readers must tolerate its absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
}

/// A durable job as stored by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub worker_hint: Option<usize>,
    pub batch_id: Option<String>,
    pub batch_index: Option<usize>,
    pub batch_total: Option<usize>,
    pub priority: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub failure_reason: Option<String>,
    pub progress: Option<JobProgress>,
    /// Number of times this job's reservation has been found stalled.
    pub stalled_count: u32,
}

impl Job {
    /// Invariant check used by tests: result iff completed, failure_reason iff failed.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        match self.status {
            JobStatus::Completed => {
                assert!(self.result.is_some());
                assert!(self.failure_reason.is_none());
            }
            JobStatus::Failed => {
                assert!(self.result.is_none());
                assert!(self.failure_reason.is_some());
            }
            JobStatus::Pending | JobStatus::Processing => {
                assert!(self.result.is_none());
                assert!(self.failure_reason.is_none());
            }
        }
        assert!(self.attempts <= self.max_attempts + 1);
    }
}

/// Parameters accepted when enqueuing a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub prompt: String,
    pub worker_hint: Option<usize>,
    pub batch_id: Option<String>,
    pub batch_index: Option<usize>,
    pub batch_total: Option<usize>,
    pub priority: i64,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn single(prompt: String, worker_hint: Option<usize>, priority: i64) -> Self {
        Self {
            prompt,
            worker_hint,
            batch_id: None,
            batch_index: None,
            batch_total: None,
            priority,
            max_attempts: 3,
        }
    }
}

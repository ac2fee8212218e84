//! JSON response shapes for the ingress API. Kept separate from
//! `searcher_common::job::Job` (snake_case, internal) since the wire format
//! is camelCase per spec.md §6.

use chrono::{DateTime, Utc};
use serde::Serialize;

use searcher_common::job::Job;

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub json: String,
    #[serde(rename = "rawText", skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(rename = "usedWorker")]
    pub used_worker: usize,
}

#[derive(Debug, Serialize)]
pub struct ProgressView {
    pub stage: String,
    #[serde(rename = "workerId", skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "batchIndex", skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.as_str(),
            progress: job.progress.map(|p| ProgressView {
                stage: p.stage,
                worker_id: p.worker_id,
            }),
            result: job.result.map(|r| ResultView {
                json: r.json,
                raw_text: r.raw_text,
                used_worker: r.used_worker,
            }),
            error: job.failure_reason,
            created_at: job.created_at,
            completed_at: job.finished_at,
            batch_index: job.batch_index,
        }
    }
}

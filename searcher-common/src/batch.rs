//! # Batch coordinator
//!
//! Bulk prompt submission fans out into N individual jobs, tracked under a
//! shared batch id. Aggregate status is derived by re-reading each member
//! job rather than kept as a separate running counter, so it self-heals if a
//! member job's record is evicted by TTL (spec.md §4.E, §8).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::{JobStatus, NewJob};
use crate::persistence::{CustomPersistenceError, PersistenceClient};
use crate::queue::{JobQueue, QueueError};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("persistence error: {0}")]
    Persistence(#[from] CustomPersistenceError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("failed to (de)serialize batch: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("batch {0} not found")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type BatchResult<T> = Result<T, BatchError>;

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;

fn batch_meta_key(id: &str) -> String {
    format!("batch:{id}:meta")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchMeta {
    id: String,
    total: usize,
    created_at: DateTime<Utc>,
}

/// Aggregate view of a batch, recomputed on every read from its member jobs.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub id: String,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Member jobs whose record could not be found (e.g. evicted by TTL).
    pub missing: usize,
    pub created_at: DateTime<Utc>,
    /// Set once every known member job has reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchStatus {
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.processing == 0 && (self.completed + self.failed + self.missing) == self.total
    }
}

pub struct BatchCoordinator {
    store: Arc<dyn PersistenceClient>,
    queue: Arc<JobQueue>,
    job_results_ttl_sec: u64,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn PersistenceClient>, queue: Arc<JobQueue>, job_results_ttl_sec: u64) -> Self {
        Self {
            store,
            queue,
            job_results_ttl_sec,
        }
    }

    /// Enqueue one job per prompt, all sharing a freshly minted batch id.
    pub async fn enqueue_bulk(
        &self,
        prompts: Vec<String>,
        worker_hint: Option<usize>,
        priority: i64,
        max_attempts: u32,
    ) -> BatchResult<BatchStatus> {
        if prompts.len() < MIN_BATCH_SIZE || prompts.len() > MAX_BATCH_SIZE {
            return Err(BatchError::InvalidArgument(format!(
                "bulk submissions must contain between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE} prompts"
            )));
        }

        let batch_id = Uuid::now_v7().to_string();
        let total = prompts.len();
        let created_at = Utc::now();

        let meta = BatchMeta {
            id: batch_id.clone(),
            total,
            created_at,
        };
        self.store
            .set(&batch_meta_key(&batch_id), &serde_json::to_string(&meta)?)
            .await?;
        self.store
            .expire(&batch_meta_key(&batch_id), self.job_results_ttl_sec)
            .await?;

        for (index, prompt) in prompts.into_iter().enumerate() {
            let new_job = NewJob {
                prompt,
                worker_hint,
                batch_id: Some(batch_id.clone()),
                batch_index: Some(index),
                batch_total: Some(total),
                priority,
                max_attempts,
            };
            self.queue.enqueue(new_job).await?;
        }

        self.status(&batch_id).await
    }

    pub async fn status(&self, batch_id: &str) -> BatchResult<BatchStatus> {
        let meta: BatchMeta = match self.store.get(&batch_meta_key(batch_id)).await? {
            Some(body) => serde_json::from_str(&body)?,
            None => return Err(BatchError::NotFound(batch_id.to_owned())),
        };

        let jobs = self.queue.jobs_for_batch(batch_id).await?;
        let known = jobs.len();

        let mut status = BatchStatus {
            id: meta.id,
            total: meta.total,
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            missing: meta.total.saturating_sub(known),
            created_at: meta.created_at,
            finished_at: None,
        };

        let mut latest_finish: Option<DateTime<Utc>> = None;
        for job in &jobs {
            match job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
            }
            if let Some(finished_at) = job.finished_at {
                latest_finish = Some(latest_finish.map_or(finished_at, |cur| cur.max(finished_at)));
            }
        }

        if status.is_complete() {
            status.finished_at = latest_finish;
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockPersistence;
    use crate::retry::RetryPolicy;

    fn coordinator() -> BatchCoordinator {
        let store: Arc<dyn PersistenceClient> = Arc::new(MockPersistence::new());
        let queue = Arc::new(JobQueue::new(store.clone(), RetryPolicy::default(), 86_400));
        BatchCoordinator::new(store, queue, 86_400)
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_batches() {
        let coordinator = coordinator();
        assert!(coordinator.enqueue_bulk(vec![], None, 0, 3).await.is_err());
        let too_many = vec!["x".to_owned(); MAX_BATCH_SIZE + 1];
        assert!(coordinator.enqueue_bulk(too_many, None, 0, 3).await.is_err());
    }

    #[tokio::test]
    async fn enqueues_one_job_per_prompt() {
        let coordinator = coordinator();
        let prompts = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let status = coordinator.enqueue_bulk(prompts, None, 0, 3).await.unwrap();

        assert_eq!(status.total, 3);
        assert_eq!(status.pending, 3);
        assert!(!status.is_complete());
    }

    #[tokio::test]
    async fn unknown_batch_errors() {
        let coordinator = coordinator();
        assert!(coordinator.status("does-not-exist").await.is_err());
    }
}

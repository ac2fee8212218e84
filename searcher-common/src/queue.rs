//! # Job queue
//!
//! The durable queue engine sitting on top of the persistence adapter (§4.A).
//! Grounded on `hook_common::pgqueue::PgQueue`'s enqueue/dequeue/retry/fail
//! shape, but expressed over ordered lists and sorted sets instead of SQL
//! `SELECT ... FOR UPDATE SKIP LOCKED`, per spec.md's BullMQ-shaped data
//! model (§2, §4.D).
//!
//! Redis key layout:
//!   - `job:{id}`        serialized `Job`, TTL'd at completion/failure
//!   - `queue:pending`   sorted set of pending job ids, score = priority
//!   - `queue:delayed`   sorted set of job ids awaiting retry, score = ready-at (epoch secs)
//!   - `queue:active`    sorted set of in-flight job ids, score = reserved-at (epoch secs)
//!   - `queue:index`     sorted set of every job id ever enqueued, score = created-at (epoch secs), for listing
//!   - `batch:{id}:jobs` plain list of job ids belonging to a batch

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MAX_STALLED_COUNT, STALLED_INTERVAL};
use crate::job::{Job, JobProgress, JobResult, JobStatus, NewJob};
use crate::persistence::{CustomPersistenceError, PersistenceClient};
use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("persistence error: {0}")]
    Persistence(#[from] CustomPersistenceError),
    #[error("failed to (de)serialize job: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job {0} not found")]
    NotFound(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

const PENDING_KEY: &str = "queue:pending";
const DELAYED_KEY: &str = "queue:delayed";
const ACTIVE_KEY: &str = "queue:active";
const INDEX_KEY: &str = "queue:index";

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

fn batch_jobs_key(batch_id: &str) -> String {
    format!("batch:{batch_id}:jobs")
}

fn now_secs() -> f64 {
    Utc::now().timestamp() as f64
}

pub struct JobQueue {
    store: Arc<dyn PersistenceClient>,
    retry_policy: RetryPolicy,
    job_results_ttl_sec: u64,
}

impl JobQueue {
    pub fn new(store: Arc<dyn PersistenceClient>, retry_policy: RetryPolicy, job_results_ttl_sec: u64) -> Self {
        Self {
            store,
            retry_policy,
            job_results_ttl_sec,
        }
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        let body = serde_json::to_string(job)?;
        self.store.setex(&job_key(&job.id), &body, self.job_results_ttl_sec).await?;
        Ok(())
    }

    /// Admit a new job, assigning it a time-ordered id and placing it on the
    /// pending queue ordered by priority (higher priority dequeues first).
    pub async fn enqueue(&self, new_job: NewJob) -> QueueResult<Job> {
        let job = Job {
            id: Uuid::now_v7().to_string(),
            prompt: new_job.prompt,
            worker_hint: new_job.worker_hint,
            batch_id: new_job.batch_id.clone(),
            batch_index: new_job.batch_index,
            batch_total: new_job.batch_total,
            priority: new_job.priority,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
            failure_reason: None,
            progress: None,
            stalled_count: 0,
        };

        self.save(&job).await?;
        self.store.zadd(PENDING_KEY, &job.id, -job.priority as f64).await?;
        self.store.zadd(INDEX_KEY, &job.id, job.created_at.timestamp() as f64).await?;

        if let Some(batch_id) = &new_job.batch_id {
            self.store.rpush(&batch_jobs_key(batch_id), &job.id).await?;
            self.store
                .expire(&batch_jobs_key(batch_id), self.job_results_ttl_sec)
                .await?;
        }

        Ok(job)
    }

    /// Pop the highest-priority pending job and mark it `Processing`.
    pub async fn reserve(&self) -> QueueResult<Option<Job>> {
        let candidates = self.store.zrangebyscore(PENDING_KEY, f64::MIN, f64::MAX).await?;
        let Some(job_id) = candidates.into_iter().next() else {
            return Ok(None);
        };
        self.store.zrem(PENDING_KEY, &job_id).await?;

        let mut job = match self.load(&job_id).await? {
            Some(job) => job,
            None => return Ok(None),
        };

        job.status = JobStatus::Processing;
        job.attempts += 1;
        self.save(&job).await?;
        self.store.zadd(ACTIVE_KEY, &job.id, now_secs()).await?;

        Ok(Some(job))
    }

    async fn load(&self, job_id: &str) -> QueueResult<Option<Job>> {
        match self.store.get(&job_key(job_id)).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, job_id: &str) -> QueueResult<Option<Job>> {
        self.load(job_id).await
    }

    /// Refresh a reserved job's position in `queue:active` so the stall
    /// sweeper doesn't mistake an in-flight dispatch for an abandoned one.
    /// Intended to be called on every progress update and, for dispatches
    /// that run long between progress updates, on a per-tick heartbeat from
    /// the runner.
    pub async fn heartbeat(&self, job_id: &str) -> QueueResult<()> {
        self.store.zadd(ACTIVE_KEY, job_id, now_secs()).await?;
        Ok(())
    }

    /// Record a best-effort progress update; tolerant of the job having
    /// already finished or been evicted, since progress is advisory. Also
    /// refreshes the job's `queue:active` reservation (see `heartbeat`).
    pub async fn update_progress(&self, job_id: &str, progress: JobProgress) -> QueueResult<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Ok(());
        };
        job.progress = Some(progress);
        self.save(&job).await?;
        self.heartbeat(job_id).await
    }

    /// Mark a job completed, recording its result and releasing its active
    /// reservation. A no-op if the job already reached a terminal state, so
    /// a reservation that was concurrently reaped as stalled and re-dispatched
    /// elsewhere cannot flip an already-`completed`/`failed` job back.
    pub async fn complete(&self, job_id: &str, result: JobResult) -> QueueResult<()> {
        let mut job = self.load(job_id).await?.ok_or_else(|| QueueError::NotFound(job_id.to_owned()))?;
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(());
        }
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.finished_at = Some(Utc::now());
        self.save(&job).await?;
        self.store.zrem(ACTIVE_KEY, job_id).await?;
        Ok(())
    }

    /// Record a failed attempt. If attempts remain, the job is scheduled for
    /// retry with exponential backoff; otherwise it is marked terminally
    /// failed. A no-op if the job already reached a terminal state (see
    /// `complete`).
    pub async fn fail(&self, job_id: &str, reason: String) -> QueueResult<()> {
        let mut job = self.load(job_id).await?.ok_or_else(|| QueueError::NotFound(job_id.to_owned()))?;
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(());
        }
        self.store.zrem(ACTIVE_KEY, job_id).await?;

        if job.attempts <= job.max_attempts {
            let delay = self.retry_policy.delay_for_attempt(job.attempts);
            job.status = JobStatus::Pending;
            job.failure_reason = Some(reason);
            self.save(&job).await?;
            let ready_at = now_secs() + delay.as_secs_f64();
            self.store.zadd(DELAYED_KEY, job_id, ready_at).await?;
        } else {
            job.status = JobStatus::Failed;
            job.failure_reason = Some(reason);
            job.finished_at = Some(Utc::now());
            self.save(&job).await?;
        }

        Ok(())
    }

    /// Move any delayed job whose backoff has elapsed back onto the pending
    /// queue. Intended to be called periodically by the janitor.
    pub async fn promote_delayed(&self) -> QueueResult<usize> {
        let ready = self.store.zrangebyscore(DELAYED_KEY, f64::MIN, now_secs()).await?;
        for job_id in &ready {
            self.store.zrem(DELAYED_KEY, job_id).await?;
            if let Some(job) = self.load(job_id).await? {
                self.store.zadd(PENDING_KEY, job_id, -job.priority as f64).await?;
            }
        }
        Ok(ready.len())
    }

    /// Re-home or terminally fail any job whose reservation has exceeded the
    /// stall interval without completing. Returns the number of jobs swept.
    pub async fn reap_stalled(&self) -> QueueResult<usize> {
        let cutoff = now_secs() - STALLED_INTERVAL.as_secs_f64();
        let stalled = self.store.zrangebyscore(ACTIVE_KEY, f64::MIN, cutoff).await?;

        for job_id in &stalled {
            self.store.zrem(ACTIVE_KEY, job_id).await?;
            let Some(mut job) = self.load(job_id).await? else {
                continue;
            };
            job.stalled_count += 1;

            if job.stalled_count >= MAX_STALLED_COUNT {
                job.status = JobStatus::Failed;
                job.failure_reason = Some("stalled".to_owned());
                job.finished_at = Some(Utc::now());
                self.save(&job).await?;
            } else {
                job.status = JobStatus::Pending;
                self.save(&job).await?;
                self.store.zadd(PENDING_KEY, job_id, -job.priority as f64).await?;
            }
        }

        Ok(stalled.len())
    }

    /// List jobs in creation order, optionally filtered by status, using a
    /// simple offset-based cursor over `queue:index`. Returns the page along
    /// with the total number of matching jobs and the offset of the next page.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> QueueResult<(Vec<Job>, usize, Option<usize>)> {
        let ids = self.store.zrangebyscore(INDEX_KEY, f64::MIN, f64::MAX).await?;

        let mut matching = Vec::new();
        for id in ids {
            let Some(job) = self.load(&id).await? else {
                continue;
            };
            if status.is_some_and(|s| s != job.status) {
                continue;
            }
            matching.push(job);
        }

        let total = matching.len();
        let page: Vec<Job> = matching.into_iter().skip(offset).take(limit).collect();
        let next_offset = if offset + page.len() < total {
            Some(offset + page.len())
        } else {
            None
        };

        Ok((page, total, next_offset))
    }

    /// Jobs belonging to a batch, in enqueue order. Tolerant of individual
    /// members having expired from the store (TTL eviction).
    pub async fn jobs_for_batch(&self, batch_id: &str) -> QueueResult<Vec<Job>> {
        let ids = self.store.lrange(&batch_jobs_key(batch_id), 0, -1).await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockPersistence;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MockPersistence::new()), RetryPolicy::default(), 86_400)
    }

    #[tokio::test]
    async fn enqueue_then_reserve_round_trips() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::single("hello".to_owned(), None, 0))
            .await
            .unwrap();

        let reserved = queue.reserve().await.unwrap().expect("job should be reserved");
        assert_eq!(reserved.id, job.id);
        assert_eq!(reserved.status, JobStatus::Processing);
        assert_eq!(reserved.attempts, 1);

        assert!(queue.reserve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn higher_priority_is_reserved_first() {
        let queue = queue();
        let low = queue.enqueue(NewJob::single("low".to_owned(), None, 0)).await.unwrap();
        let high = queue.enqueue(NewJob::single("high".to_owned(), None, 10)).await.unwrap();

        let first = queue.reserve().await.unwrap().unwrap();
        assert_eq!(first.id, high.id);
        let second = queue.reserve().await.unwrap().unwrap();
        assert_eq!(second.id, low.id);
    }

    #[tokio::test]
    async fn complete_records_result_and_clears_active() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::single("hello".to_owned(), None, 0))
            .await
            .unwrap();
        queue.reserve().await.unwrap();

        queue
            .complete(
                &job.id,
                JobResult {
                    json: "{}".to_owned(),
                    raw_text: None,
                    used_worker: 1,
                },
            )
            .await
            .unwrap();

        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.result.is_some());
        stored.check_invariants();
    }

    #[tokio::test]
    async fn fail_retries_until_max_attempts_then_terminally_fails() {
        let mut new_job = NewJob::single("hello".to_owned(), None, 0);
        new_job.max_attempts = 1;
        let queue = queue();
        let job = queue.enqueue(new_job).await.unwrap();

        queue.reserve().await.unwrap();
        queue.fail(&job.id, "boom".to_owned()).await.unwrap();
        let retried = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Pending);

        assert_eq!(queue.promote_delayed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stalled_job_is_requeued_then_eventually_fails() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::single("hello".to_owned(), None, 0))
            .await
            .unwrap();
        queue.reserve().await.unwrap();

        for expected_count in 1..=MAX_STALLED_COUNT {
            queue.store.zadd("queue:active", &job.id, f64::MIN).await.unwrap();
            queue.reap_stalled().await.unwrap();
            let current = queue.get(&job.id).await.unwrap().unwrap();
            assert_eq!(current.stalled_count, expected_count);
        }

        let terminal = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(terminal.status, JobStatus::Failed);
        assert_eq!(terminal.failure_reason.as_deref(), Some("stalled"));
    }
}

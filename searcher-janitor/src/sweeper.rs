//! # Stall sweeper
//!
//! TTL reaping of terminal job records is delegated entirely to the
//! persistence adapter's native `EXPIRE` (see SPEC_FULL.md §2); this janitor
//! only needs to own the two things that don't happen for free in a
//! key/value store: promoting due retries off the `queue:delayed` sorted set
//! and re-homing reservations that have stalled past `STALLED_INTERVAL`.
//!
//! Grounded on `hook-janitor::cleanup::Cleaner`'s one-method trait plus
//! `hook-janitor::main::cleanup_loop`'s interval-driven loop, adapted to the
//! two queue-maintenance operations this service needs instead of a Kafka
//! flush.

use std::sync::Arc;

use tracing::info;

use searcher_common::queue::{JobQueue, QueueError};

pub struct StallSweeper {
    queue: Arc<JobQueue>,
}

impl StallSweeper {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Run one sweep: promote due retries, then reap stalled reservations.
    /// Errors are logged and swallowed; a failed sweep is retried on the
    /// next tick.
    pub async fn sweep(&self) -> Result<(), QueueError> {
        let promoted = self.queue.promote_delayed().await?;
        let reaped = self.queue.reap_stalled().await?;

        if promoted > 0 || reaped > 0 {
            info!(promoted, reaped, "stall sweeper cycle complete");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searcher_common::job::{JobStatus, NewJob};
    use searcher_common::persistence::MockPersistence;
    use searcher_common::retry::RetryPolicy;

    #[tokio::test]
    async fn sweep_promotes_due_retries() {
        let queue = Arc::new(JobQueue::new(
            Arc::new(MockPersistence::new()),
            RetryPolicy::new(
                2,
                std::time::Duration::from_secs(0),
                std::time::Duration::from_secs(0),
            ),
            86_400,
        ));
        let mut new_job = NewJob::single("hello".to_owned(), None, 0);
        new_job.max_attempts = 3;
        let job = queue.enqueue(new_job).await.unwrap();
        queue.reserve().await.unwrap();
        queue.fail(&job.id, "boom".to_owned()).await.unwrap();

        let sweeper = StallSweeper::new(queue.clone());
        sweeper.sweep().await.unwrap();

        let reserved = queue.reserve().await.unwrap().expect("retry should be promoted to pending");
        assert_eq!(reserved.id, job.id);
        assert_eq!(reserved.status, JobStatus::Processing);
    }
}

//! # Dispatcher runner pool
//!
//! A fixed pool of runners, sized to the configured worker-endpoint count
//! (spec.md §4.D), each independently polling the job queue and driving
//! whatever it reserves through the dispatcher. Grounded on
//! `hook-worker::worker::WebhookWorker::wait_for_job`/`run`'s poll-interval
//! loop, generalized from one job-processing task per dequeue to a fixed
//! pool since this domain has no batching or transactional dequeue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use searcher_common::config::ACTIVE_HEARTBEAT_INTERVAL;
use searcher_common::dispatcher::Dispatcher;
use searcher_common::health::HealthHandle;
use searcher_common::job::{Job, JobProgress};
use searcher_common::queue::JobQueue;

pub struct DispatcherRunner {
    index: usize,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    job_deadline: Duration,
    liveness: HealthHandle,
}

impl DispatcherRunner {
    pub fn new(
        index: usize,
        queue: Arc<JobQueue>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
        job_deadline: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            index,
            queue,
            dispatcher,
            poll_interval,
            job_deadline,
            liveness,
        }
    }

    /// Poll the queue forever, reporting healthy on every tick and
    /// processing whatever is reserved.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            match self.queue.reserve().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {}
                Err(err) => {
                    error!(runner = self.index, "failed to reserve a job: {}", err);
                }
            }
        }
    }

    async fn process(&self, job: Job) {
        let job_id = job.id.clone();

        if let Err(err) = self
            .queue
            .update_progress(
                &job_id,
                JobProgress {
                    stage: "dispatching".to_owned(),
                    worker_id: None,
                },
            )
            .await
        {
            warn!(runner = self.index, job = job_id, "failed to publish progress: {}", err);
        }

        // The dispatch may legitimately run for most of `job_deadline`, well
        // past `STALLED_INTERVAL`; keep the reservation's `queue:active`
        // score fresh for as long as it's in flight so the stall sweeper
        // doesn't re-home it onto another runner mid-dispatch.
        let heartbeat_queue = self.queue.clone();
        let heartbeat_job_id = job_id.clone();
        let heartbeat_runner = self.index;
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ACTIVE_HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if let Err(err) = heartbeat_queue.heartbeat(&heartbeat_job_id).await {
                    warn!(runner = heartbeat_runner, job = heartbeat_job_id, "failed to heartbeat reservation: {}", err);
                }
            }
        });

        let outcome = tokio::time::timeout(
            self.job_deadline,
            self.dispatcher.dispatch(&job.prompt, job.worker_hint),
        )
        .await;

        heartbeat.abort();

        let result = match outcome {
            Ok(Ok(result)) => self.queue.complete(&job_id, result).await,
            Ok(Err(dispatch_error)) => self.queue.fail(&job_id, dispatch_error.to_string()).await,
            Err(_elapsed) => self.queue.fail(&job_id, "per-job deadline exceeded".to_owned()).await,
        };

        if let Err(err) = result {
            error!(runner = self.index, job = job_id, "failed to record job outcome: {}", err);
        } else {
            info!(runner = self.index, job = job_id, "dispatch attempt finished");
        }
    }
}

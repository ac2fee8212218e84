//! # Dispatcher
//!
//! The heart of the service: finds a free worker, issues a search, classifies
//! the outcome, and retries across workers within a bounded attempt budget
//! that acts as a circuit breaker. See spec.md §4.C.
//!
//! Structurally grounded on `hook-worker::worker::WebhookWorker`'s
//! poll-and-process loop, but the selection/retry algorithm itself is
//! original to this spec: the teacher's retry is exponential backoff at the
//! job-attempt layer, while this dispatcher retries tightly *within* a single
//! attempt, re-probing worker health every iteration (spec.md's "Open
//! Question" adopts this circuit-breaker variant as the primary contract).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{DISPATCH_ATTEMPT_MULTIPLIER, DISPATCH_RETRY_DELAY};
use crate::job::JobResult;
use crate::worker_client::{WorkerClient, WorkerOutcome};

pub const MAX_PROMPT_LEN: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no worker produced a terminal outcome within the attempt budget")]
    Exhausted,
}

/// Validate a prompt per spec.md §3: non-empty, at most `MAX_PROMPT_LEN` chars.
pub fn validate_prompt(prompt: &str) -> Result<(), DispatchError> {
    if prompt.is_empty() {
        return Err(DispatchError::InvalidArgument("prompt must not be empty".to_owned()));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(DispatchError::InvalidArgument(format!(
            "prompt exceeds {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

/// A sleep hook so tests can skip real waiting. Defaults to `tokio::time::sleep`.
pub type SleepFn = fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;

fn default_sleep(duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(tokio::time::sleep(duration))
}

pub struct Dispatcher {
    client: WorkerClient,
    max_attempts_base: u32,
    sleep: SleepFn,
}

impl Dispatcher {
    pub fn new(client: WorkerClient, max_attempts_base: u32) -> Self {
        Self {
            client,
            max_attempts_base,
            sleep: default_sleep,
        }
    }

    #[cfg(test)]
    pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
        self.sleep = sleep;
        self
    }

    /// Dispatch one prompt to exactly one worker, never returning partial success.
    pub async fn dispatch(
        &self,
        prompt: &str,
        worker_hint: Option<usize>,
    ) -> Result<JobResult, DispatchError> {
        validate_prompt(prompt)?;

        let worker_count = self.client.worker_count();
        if let Some(hint) = worker_hint {
            if hint == 0 || hint > worker_count {
                return Err(DispatchError::InvalidArgument(format!(
                    "workerHint {hint} out of range [1..{worker_count}]"
                )));
            }
        }

        if let Some(hint) = worker_hint {
            let health = self.client.health(hint).await;
            if health.is_free() {
                match self.client.search(hint, prompt).await {
                    WorkerOutcome::Success(result) => return Ok(result),
                    WorkerOutcome::Empty(raw_text) => {
                        return Ok(JobResult {
                            json: String::new(),
                            raw_text,
                            used_worker: hint,
                        })
                    }
                    other => {
                        warn!(
                            worker = hint,
                            "hinted worker did not succeed ({:?}), falling back to dynamic selection", other
                        );
                    }
                }
            }
        }

        let max_attempts = self.max_attempts_base.saturating_mul(DISPATCH_ATTEMPT_MULTIPLIER);
        let mut attempt: u32 = 0;
        let mut no_free_worker_cycles: u64 = 0;

        loop {
            if attempt >= max_attempts {
                return Err(DispatchError::Exhausted);
            }
            attempt += 1;

            let healths = join_all((1..=worker_count).map(|idx| self.client.health(idx))).await;
            let free_worker = healths
                .iter()
                .enumerate()
                .find(|(_, health)| health.is_free())
                .map(|(idx, _)| idx + 1);

            let Some(worker_index) = free_worker else {
                no_free_worker_cycles += 1;
                if no_free_worker_cycles % 10 == 0 {
                    info!(
                        cycles = no_free_worker_cycles,
                        "all workers busy, still waiting for a free worker"
                    );
                }
                (self.sleep)(DISPATCH_RETRY_DELAY).await;
                continue;
            };

            match self.client.search(worker_index, prompt).await {
                WorkerOutcome::Success(result) => return Ok(result),
                WorkerOutcome::Empty(raw_text) => {
                    return Ok(JobResult {
                        json: String::new(),
                        raw_text,
                        used_worker: worker_index,
                    })
                }
                WorkerOutcome::Blocked(reason) => {
                    warn!(worker = worker_index, reason, "worker blocked, retrying another worker");
                }
                WorkerOutcome::Busy => {
                    warn!(worker = worker_index, "worker became busy mid-flight, retrying");
                }
                WorkerOutcome::Transient(error) => {
                    warn!(worker = worker_index, error, "transient worker error, retrying");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_prompt_length() {
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt(&"a".repeat(MAX_PROMPT_LEN)).is_ok());
        assert!(validate_prompt(&"a".repeat(MAX_PROMPT_LEN + 1)).is_err());
    }
}

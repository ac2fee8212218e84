//! # Worker client
//!
//! One-shot HTTP calls to a single browser-automation worker, with a
//! caller-supplied deadline per call. Grounded on
//! `hook_common::webhook`/`hook-worker::worker::send_webhook`: a single
//! shared `reqwest::Client`, JSON bodies, and response classification into a
//! closed sum type rather than ad hoc status-code checks scattered at call
//! sites.

use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::JobResult;

#[derive(Error, Debug)]
pub enum WorkerClientError {
    #[error("worker index {0} is out of range")]
    IndexOutOfRange(usize),
}

/// A transient, never-persisted view of a single worker's health.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WorkerHealth {
    pub ok: bool,
    #[serde(default)]
    pub busy: bool,
    /// `None` is treated the same as `Some(true)` per spec.md §4.C ("ready != false").
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerHealth {
    pub fn is_free(&self) -> bool {
        self.ok && !self.busy && self.ready != Some(false)
    }
}

/// The closed sum type classifying every possible worker response to a search.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// 2xx with `{ ok: true, result: { json, raw_text? } }`.
    Success(JobResult),
    /// 422 `empty_result`; treated as success with an empty `json`.
    Empty(Option<String>),
    /// 503 `retry_other_worker: true`; transient, skip this worker.
    Blocked(String),
    /// 423 / "Locked" / "busy"; the worker became busy mid-flight.
    Busy,
    /// Any other 4xx/5xx, network error, or timeout.
    Transient(String),
}

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct SearchSuccessEnvelope {
    #[serde(default)]
    ok: bool,
    result: Option<SearchSuccessResult>,
}

#[derive(Deserialize)]
struct SearchSuccessResult {
    json: String,
    raw_text: Option<String>,
}

#[derive(Deserialize)]
struct SearchErrorEnvelope {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    raw_text: Option<String>,
    #[serde(default)]
    retry_other_worker: bool,
}

/// Timeouts for each of the five operations a worker exposes.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTimeouts {
    pub health: Duration,
    pub search: Duration,
    pub warmup: Duration,
    pub restart: Duration,
    pub refresh: Duration,
}

pub struct WorkerClient {
    client: reqwest::Client,
    base_urls: Vec<String>,
    timeouts: WorkerTimeouts,
}

impl WorkerClient {
    pub fn new(base_urls: Vec<String>, timeouts: WorkerTimeouts) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("prompt-dispatch worker client")
            .build()
            .expect("failed to construct reqwest client for worker client");

        Self {
            client,
            base_urls,
            timeouts,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.base_urls.len()
    }

    fn url_for(&self, worker_index: usize, path: &str) -> Result<String, WorkerClientError> {
        let base = self
            .base_urls
            .get(worker_index.wrapping_sub(1))
            .ok_or(WorkerClientError::IndexOutOfRange(worker_index))?;
        Ok(format!("{base}{path}"))
    }

    /// Probe a single worker's health. Never returns `Err` to the caller:
    /// network/parse failure folds into an unhealthy snapshot.
    pub async fn health(&self, worker_index: usize) -> WorkerHealth {
        let url = match self.url_for(worker_index, "/health") {
            Ok(url) => url,
            Err(error) => {
                return WorkerHealth {
                    ok: false,
                    error: Some(error.to_string()),
                    ..Default::default()
                }
            }
        };

        let response = self
            .client
            .get(&url)
            .timeout(self.timeouts.health)
            .send()
            .await;

        match response {
            Ok(response) => match response.json::<WorkerHealth>().await {
                Ok(health) => health,
                Err(error) => WorkerHealth {
                    ok: false,
                    error: Some(error.to_string()),
                    ..Default::default()
                },
            },
            Err(error) => WorkerHealth {
                ok: false,
                error: Some(error.to_string()),
                ..Default::default()
            },
        }
    }

    /// Issue a search request to a specific worker, classifying the response
    /// per spec.md §4.B.
    pub async fn search(&self, worker_index: usize, prompt: &str) -> WorkerOutcome {
        let url = match self.url_for(worker_index, "/search") {
            Ok(url) => url,
            Err(error) => return WorkerOutcome::Transient(error.to_string()),
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.search)
            .json(&SearchRequestBody { prompt })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                return WorkerOutcome::Transient(format!("timed out: {error}"))
            }
            Err(error) => return WorkerOutcome::Transient(error.to_string()),
        };

        let status = response.status();

        if status.is_success() {
            return match response.json::<SearchSuccessEnvelope>().await {
                Ok(envelope) if envelope.ok => match envelope.result {
                    Some(result) => WorkerOutcome::Success(JobResult {
                        json: result.json,
                        raw_text: result.raw_text,
                        used_worker: worker_index,
                    }),
                    None => WorkerOutcome::Transient("2xx response missing result".to_owned()),
                },
                Ok(_) => WorkerOutcome::Transient("2xx response with ok:false".to_owned()),
                Err(error) => WorkerOutcome::Transient(format!("failed to parse response: {error}")),
            };
        }

        if status.as_u16() == 422 {
            let body = response.json::<SearchErrorEnvelope>().await.ok();
            if body.as_ref().and_then(|b| b.error.as_deref()) == Some("empty_result") {
                return WorkerOutcome::Empty(body.and_then(|b| b.raw_text));
            }
            return WorkerOutcome::Transient("422 without empty_result".to_owned());
        }

        if status.as_u16() == 503 {
            let body = response.json::<SearchErrorEnvelope>().await.ok();
            if body.as_ref().map(|b| b.retry_other_worker).unwrap_or(false) {
                let reason = body
                    .and_then(|b| b.error)
                    .unwrap_or_else(|| "blocked".to_owned());
                return WorkerOutcome::Blocked(reason);
            }
            return WorkerOutcome::Transient("503 without retry_other_worker".to_owned());
        }

        if status.as_u16() == 423 || is_busy_status_text(status.as_str()) {
            return WorkerOutcome::Busy;
        }

        let text = response.text().await.unwrap_or_default();
        if text.to_ascii_lowercase().contains("locked") || text.to_ascii_lowercase().contains("busy") {
            return WorkerOutcome::Busy;
        }

        WorkerOutcome::Transient(format!("unexpected status {status}: {text}"))
    }

    /// Fire-and-log warmup call, not on the critical dispatch path.
    pub async fn warmup_search_tab(&self, worker_index: usize) {
        self.fire_and_log(worker_index, "/tabs/search", self.timeouts.warmup, "warmup")
            .await
    }

    /// Fire-and-log browser restart, used opportunistically after repeated `Blocked` outcomes.
    pub async fn restart_browser(&self, worker_index: usize) {
        self.fire_and_log(worker_index, "/browser/restart", self.timeouts.restart, "restart")
            .await
    }

    /// Fire-and-log session refresh.
    pub async fn refresh_session(&self, worker_index: usize) {
        self.fire_and_log(worker_index, "/session/refresh", self.timeouts.refresh, "refresh")
            .await
    }

    async fn fire_and_log(&self, worker_index: usize, path: &str, timeout: Duration, op: &str) {
        let url = match self.url_for(worker_index, path) {
            Ok(url) => url,
            Err(error) => {
                warn!("{op} failed for worker {worker_index}: {error}");
                return;
            }
        };

        match self.client.post(&url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("{op} succeeded for worker {worker_index}")
            }
            Ok(response) => warn!("{op} failed for worker {worker_index}: status {}", response.status()),
            Err(error) => warn!("{op} failed for worker {worker_index}: {error}"),
        }
    }
}

fn is_busy_status_text(status_str: &str) -> bool {
    status_str.to_ascii_lowercase().contains("locked") || status_str.to_ascii_lowercase().contains("busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> WorkerTimeouts {
        WorkerTimeouts {
            health: Duration::from_millis(50),
            search: Duration::from_millis(50),
            warmup: Duration::from_millis(50),
            restart: Duration::from_millis(50),
            refresh: Duration::from_millis(50),
        }
    }

    #[test]
    fn worker_health_is_free_requires_ok_and_not_busy() {
        let health = WorkerHealth {
            ok: true,
            busy: false,
            ready: None,
            ..Default::default()
        };
        assert!(health.is_free());

        let busy = WorkerHealth {
            ok: true,
            busy: true,
            ready: None,
            ..Default::default()
        };
        assert!(!busy.is_free());

        let not_ready = WorkerHealth {
            ok: true,
            busy: false,
            ready: Some(false),
            ..Default::default()
        };
        assert!(!not_ready.is_free());
    }

    #[tokio::test]
    async fn url_for_out_of_range_index_errors() {
        let client = WorkerClient::new(vec!["http://localhost:1".to_owned()], timeouts());
        assert!(client.url_for(0, "/health").is_err());
        assert!(client.url_for(2, "/health").is_err());
        assert!(client.url_for(1, "/health").is_ok());
    }
}

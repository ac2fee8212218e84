use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use searcher_common::dispatcher::validate_prompt;
use searcher_common::idempotency::Admission;
use searcher_common::job::NewJob;

use crate::envelope;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::state::AppState;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct WorkerHintQuery {
    pub worker: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequestBody {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
struct PromptAccepted {
    #[serde(rename = "jobId")]
    job_id: String,
}

fn validate_worker_hint(hint: Option<usize>, worker_count: usize) -> Result<Option<usize>, ApiError> {
    match hint {
        None => Ok(None),
        Some(0) => Err(ApiError::BadRequest(format!(
            "worker hint must be in [1..{worker_count}]"
        ))),
        Some(n) if n > worker_count => Err(ApiError::BadRequest(format!(
            "worker hint must be in [1..{worker_count}]"
        ))),
        Some(n) => Ok(Some(n)),
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

pub async fn post_prompt(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<WorkerHintQuery>,
    headers: HeaderMap,
    Json(body): Json<PromptRequestBody>,
) -> Response {
    let started = Instant::now();

    let result = handle_post_prompt(state, &query, &headers, body).await;
    match result {
        Ok(job_id) => envelope::success(
            axum::http::StatusCode::ACCEPTED,
            &request_id,
            started,
            PromptAccepted { job_id },
        ),
        Err(err) => envelope::error(&request_id, &err),
    }
}

async fn handle_post_prompt(
    state: AppState,
    query: &WorkerHintQuery,
    headers: &HeaderMap,
    body: PromptRequestBody,
) -> Result<String, ApiError> {
    validate_prompt(&body.prompt).map_err(|e| ApiError::Validation(e.to_string()))?;
    let worker_hint = validate_worker_hint(query.worker, state.worker_count)?;

    if let Some(key) = idempotency_key(headers) {
        if let Some(existing) = state.idempotency.lookup(&key).await? {
            return Ok(existing);
        }
    }

    let job = state
        .queue
        .enqueue(NewJob {
            prompt: body.prompt,
            worker_hint,
            batch_id: None,
            batch_index: None,
            batch_total: None,
            priority: 0,
            max_attempts: state.default_max_attempts,
        })
        .await?;

    // Per spec.md §4.F, the mapping is persisted only after the job exists.
    // A concurrent first-time use of the same key may race past the lookup
    // above and also create a job; `admit` then reports whichever id won,
    // and we return that one instead of the job we just created.
    if let Some(key) = idempotency_key(headers) {
        return Ok(match state.idempotency.admit(&key, &job.id).await? {
            Admission::Miss => job.id,
            Admission::Hit(existing) => existing,
        });
    }

    Ok(job.id)
}

#[derive(Debug, Deserialize)]
pub struct PromptBulkRequestBody {
    pub prompts: Vec<PromptRequestBody>,
}

#[derive(Debug, Serialize)]
struct BulkAccepted {
    #[serde(rename = "batchId")]
    batch_id: String,
    #[serde(rename = "jobIds")]
    job_ids: Vec<String>,
    count: usize,
}

pub async fn post_prompt_bulk(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<WorkerHintQuery>,
    headers: HeaderMap,
    Json(body): Json<PromptBulkRequestBody>,
) -> Response {
    let started = Instant::now();

    match handle_post_prompt_bulk(state, &query, &headers, body).await {
        Ok(accepted) => envelope::success(axum::http::StatusCode::ACCEPTED, &request_id, started, accepted),
        Err(err) => envelope::error(&request_id, &err),
    }
}

async fn handle_post_prompt_bulk(
    state: AppState,
    query: &WorkerHintQuery,
    headers: &HeaderMap,
    body: PromptBulkRequestBody,
) -> Result<BulkAccepted, ApiError> {
    let worker_hint = validate_worker_hint(query.worker, state.worker_count)?;

    for item in &body.prompts {
        validate_prompt(&item.prompt).map_err(|e| ApiError::Validation(e.to_string()))?;
    }

    let scoped_key = idempotency_key(headers).map(|key| format!("bulk:{key}"));

    if let Some(scoped_key) = &scoped_key {
        if let Some(existing) = state.idempotency.lookup(scoped_key).await? {
            let status = state.batches.status(&existing).await?;
            let jobs = state.queue.jobs_for_batch(&existing).await?;
            return Ok(BulkAccepted {
                count: status.total,
                job_ids: jobs.into_iter().map(|j| j.id).collect(),
                batch_id: status.id,
            });
        }
    }

    let prompts: Vec<String> = body.prompts.into_iter().map(|p| p.prompt).collect();
    let status = state
        .batches
        .enqueue_bulk(prompts, worker_hint, 0, state.default_max_attempts)
        .await?;
    let jobs = state.queue.jobs_for_batch(&status.id).await?;

    // Mirrors the single-prompt path: persist the mapping after the batch
    // exists, and defer to whichever batch id won a concurrent race.
    if let Some(scoped_key) = &scoped_key {
        let winning_id = match state.idempotency.admit(scoped_key, &status.id).await? {
            Admission::Miss => status.id,
            Admission::Hit(existing) => existing,
        };
        if winning_id != status.id {
            let status = state.batches.status(&winning_id).await?;
            let jobs = state.queue.jobs_for_batch(&winning_id).await?;
            return Ok(BulkAccepted {
                count: status.total,
                job_ids: jobs.into_iter().map(|j| j.id).collect(),
                batch_id: status.id,
            });
        }
    }

    Ok(BulkAccepted {
        count: jobs.len(),
        job_ids: jobs.into_iter().map(|j| j.id).collect(),
        batch_id: status.id,
    })
}

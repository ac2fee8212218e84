use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Extension;
use serde::{Deserialize, Serialize};

use searcher_common::cursor::{decode_cursor, encode_cursor};
use searcher_common::job::JobStatus;

use crate::dto::JobView;
use crate::envelope;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::state::AppState;

const MAX_LIST_LIMIT: usize = 100;
const DEFAULT_LIST_LIMIT: usize = 20;

pub async fn get_job(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> Response {
    let started = Instant::now();

    let result = async {
        let job = state
            .queue
            .get(&job_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
        Ok::<_, ApiError>(JobView::from(job))
    }
    .await;

    match result {
        Ok(view) => envelope::success(axum::http::StatusCode::OK, &request_id, started, view),
        Err(err) => envelope::error(&request_id, &err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "pageToken")]
    pub page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct Pagination {
    #[serde(rename = "totalItems")]
    total_items: usize,
    #[serde(rename = "itemsPerPage")]
    items_per_page: usize,
    #[serde(rename = "nextPageToken", skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct JobsListResponse {
    items: Vec<JobView>,
    pagination: Pagination,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<ListJobsQuery>,
) -> Response {
    let started = Instant::now();

    let result = handle_list_jobs(state, query).await;
    match result {
        Ok(response) => envelope::success(axum::http::StatusCode::OK, &request_id, started, response),
        Err(err) => envelope::error(&request_id, &err),
    }
}

async fn handle_list_jobs(state: AppState, query: ListJobsQuery) -> Result<JobsListResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit > MAX_LIST_LIMIT {
        return Err(ApiError::Validation(format!(
            "limit must not exceed {MAX_LIST_LIMIT}"
        )));
    }

    let status = match &query.status {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(|_| ApiError::Validation(format!("unknown status {raw}")))?,
        ),
        None => None,
    };

    let offset = decode_cursor(query.page_token.as_deref());
    let (jobs, total_items, next_offset) = state.queue.list(status, limit, offset).await?;

    Ok(JobsListResponse {
        items: jobs.into_iter().map(JobView::from).collect(),
        pagination: Pagination {
            total_items,
            items_per_page: limit,
            next_page_token: next_offset.map(encode_cursor),
        },
    })
}

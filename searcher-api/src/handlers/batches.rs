use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Extension;
use serde::Serialize;

use crate::dto::JobView;
use crate::envelope;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct BatchView {
    #[serde(rename = "batchId")]
    batch_id: String,
    total: usize,
    completed: usize,
    processing: usize,
    pending: usize,
    failed: usize,
    jobs: Vec<JobView>,
}

pub async fn get_batch(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(batch_id): Path<String>,
) -> Response {
    let started = Instant::now();

    let result = async {
        let status = state.batches.status(&batch_id).await?;
        let mut jobs = state.queue.jobs_for_batch(&batch_id).await?;
        jobs.sort_by_key(|j| j.batch_index.unwrap_or(usize::MAX));

        Ok::<_, ApiError>(BatchView {
            batch_id: status.id,
            total: status.total,
            completed: status.completed,
            processing: status.processing,
            pending: status.pending,
            failed: status.failed,
            jobs: jobs.into_iter().map(JobView::from).collect(),
        })
    }
    .await;

    match result {
        Ok(view) => envelope::success(axum::http::StatusCode::OK, &request_id, started, view),
        Err(err) => envelope::error(&request_id, &err),
    }
}

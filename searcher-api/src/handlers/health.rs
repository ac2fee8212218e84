use std::time::Instant;

use axum::extract::State;
use axum::response::Response;
use axum::Extension;

use crate::envelope;
use crate::middleware::RequestId;
use crate::state::AppState;

/// Per spec.md §6, `/health` never returns 5xx unless the process itself is
/// dead (in which case it wouldn't be answering requests at all) — an
/// unhealthy component is reported in the 200 body, not via status code.
pub async fn get_health(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    let started = Instant::now();
    let health = state.health.check().await;
    envelope::success(axum::http::StatusCode::OK, &request_id, started, health)
}

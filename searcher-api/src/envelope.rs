//! The `{data, meta}` / `{error, meta}` response envelope enforced by
//! ingress (spec.md §6), built as a thin response-construction helper rather
//! than a generic `IntoResponse` impl — mirrors how
//! `hook_common::health::HealthStatus` formats its own body directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::time::Instant;

use crate::error::ApiError;

pub fn success<T: Serialize>(status: StatusCode, request_id: &str, started: Instant, data: T) -> Response {
    let body = json!({
        "data": data,
        "meta": {
            "requestId": request_id,
            "processingTimeMs": started.elapsed().as_secs_f64() * 1000.0,
        },
    });
    (status, Json(body)).into_response()
}

pub fn error(request_id: &str, error: &ApiError) -> Response {
    let body = json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        },
        "meta": {
            "requestId": request_id,
        },
    });
    (error.status(), Json(body)).into_response()
}

pub fn bad_request(request_id: &str, message: &str) -> Response {
    let body = json!({
        "error": {
            "code": "BAD_REQUEST",
            "message": message,
        },
        "meta": {
            "requestId": request_id,
        },
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

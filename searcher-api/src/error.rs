//! Ingress error taxonomy, per spec.md §7. Each variant knows its own HTTP
//! status and envelope error code; handlers convert into the response
//! envelope explicitly, the same way `hook-api`'s handlers build their
//! `(StatusCode, Json<..>)` tuples by hand rather than through a blanket
//! `IntoResponse` impl.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed request shape: bad query parameter, unparsable JSON. Spec.md
    /// §8 calls out `?worker=0`/`?worker=N+1` as `BAD_REQUEST` specifically,
    /// distinct from body-content `VALIDATION_ERROR`.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<searcher_common::queue::QueueError> for ApiError {
    fn from(error: searcher_common::queue::QueueError) -> Self {
        match error {
            searcher_common::queue::QueueError::NotFound(id) => {
                ApiError::NotFound(format!("job {id} not found"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<searcher_common::batch::BatchError> for ApiError {
    fn from(error: searcher_common::batch::BatchError) -> Self {
        match error {
            searcher_common::batch::BatchError::NotFound(id) => {
                ApiError::NotFound(format!("batch {id} not found"))
            }
            searcher_common::batch::BatchError::InvalidArgument(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<searcher_common::dispatcher::DispatchError> for ApiError {
    fn from(error: searcher_common::dispatcher::DispatchError) -> Self {
        match error {
            searcher_common::dispatcher::DispatchError::InvalidArgument(msg) => ApiError::Validation(msg),
            searcher_common::dispatcher::DispatchError::Exhausted => {
                ApiError::Upstream("worker pool exhausted its attempt budget".to_owned())
            }
        }
    }
}

impl From<searcher_common::persistence::CustomPersistenceError> for ApiError {
    fn from(error: searcher_common::persistence::CustomPersistenceError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

//! Request-id enforcement. `spec.md` §6 requires every request to carry
//! `X-Request-Id`; a missing header is rejected before the handler runs.
//! Built fresh in the teacher's `axum::middleware::from_fn` idiom, since
//! the teacher has no equivalent of its own (see SPEC_FULL.md §6).

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::envelope;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Newtype carried in request extensions so handlers can read the caller's
/// request id without re-parsing headers.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn require_request_id(mut req: Request<Body>, next: Next) -> Response {
    let header = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let Some(request_id) = header else {
        return envelope::bad_request("", "missing required header X-Request-Id");
    };

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

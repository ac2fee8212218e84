pub mod batches;
pub mod health;
pub mod jobs;
pub mod prompts;

use axum::{routing, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::middleware::require_request_id;
use crate::state::AppState;

const BASE_PATH: &str = "/search-intelligence/searcher/v1";

pub fn add_routes(router: Router, state: AppState, max_body_size: usize) -> Router {
    let api = Router::new()
        .route("/prompts", routing::post(prompts::post_prompt))
        .route("/prompts/bulk", routing::post(prompts::post_prompt_bulk))
        .route("/jobs", routing::get(jobs::list_jobs))
        .route("/jobs/:id", routing::get(jobs::get_job))
        .route("/batches/:id", routing::get(batches::get_batch))
        .route("/health", routing::get(health::get_health))
        .layer(axum::middleware::from_fn(require_request_id))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .with_state(state);

    router
        .route("/", routing::get(index))
        .nest(BASE_PATH, api)
}

pub async fn index() -> &'static str {
    "prompt dispatch api"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{self, Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use searcher_common::batch::BatchCoordinator;
    use searcher_common::health::HealthRegistry;
    use searcher_common::health_aggregator::HealthAggregator;
    use searcher_common::idempotency::IdempotencyCache;
    use searcher_common::persistence::{MockPersistence, PersistenceClient};
    use searcher_common::queue::JobQueue;
    use searcher_common::retry::RetryPolicy;
    use searcher_common::worker_client::{WorkerClient, WorkerTimeouts};

    use super::add_routes;
    use crate::state::AppState;

    const MAX_BODY_SIZE: usize = 1_000_000;
    const BASE_PATH: &str = "/search-intelligence/searcher/v1";

    fn test_timeouts() -> WorkerTimeouts {
        WorkerTimeouts {
            health: Duration::from_millis(50),
            search: Duration::from_millis(50),
            warmup: Duration::from_millis(50),
            restart: Duration::from_millis(50),
            refresh: Duration::from_millis(50),
        }
    }

    async fn test_app(worker_count: usize) -> Router {
        let store: Arc<dyn PersistenceClient> = Arc::new(MockPersistence::new());
        let queue = Arc::new(JobQueue::new(store.clone(), RetryPolicy::default(), 86_400));
        let batches = Arc::new(BatchCoordinator::new(store.clone(), queue.clone(), 86_400));
        let idempotency = Arc::new(IdempotencyCache::new(store.clone(), 604_800));

        let worker_urls: Vec<String> = (0..worker_count)
            .map(|i| format!("http://127.0.0.1:{}", 9000 + i))
            .collect();
        let worker_client = Arc::new(WorkerClient::new(worker_urls, test_timeouts()));

        let registry = HealthRegistry::new("liveness");
        let health = Arc::new(HealthAggregator::new(registry, store, worker_client));

        let state = AppState {
            queue,
            batches,
            idempotency,
            health,
            default_max_attempts: 3,
            worker_count,
        };

        add_routes(Router::new(), state, MAX_BODY_SIZE)
    }

    fn request(method: http::Method, uri: &str, request_id: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(request_id) = request_id {
            builder = builder.header("x-request-id", request_id);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_request_id_is_rejected() {
        let app = test_app(2).await;

        let response = app
            .oneshot(request(
                http::Method::POST,
                &format!("{BASE_PATH}/prompts"),
                None,
                serde_json::json!({ "prompt": "hello" }).to_string(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn worker_hint_zero_is_rejected() {
        let app = test_app(2).await;

        let response = app
            .oneshot(request(
                http::Method::POST,
                &format!("{BASE_PATH}/prompts?worker=0"),
                Some("req-1"),
                serde_json::json!({ "prompt": "hello" }).to_string(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn worker_hint_out_of_range_is_rejected() {
        let app = test_app(2).await;

        let response = app
            .oneshot(request(
                http::Method::POST,
                &format!("{BASE_PATH}/prompts?worker=3"),
                Some("req-1"),
                serde_json::json!({ "prompt": "hello" }).to_string(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn idempotency_key_returns_the_same_job_id() {
        let app = test_app(2).await;

        let mut req = request(
            http::Method::POST,
            &format!("{BASE_PATH}/prompts"),
            Some("req-1"),
            serde_json::json!({ "prompt": "hello" }).to_string(),
        );
        req.headers_mut()
            .insert("idempotency-key", "same-key".parse().unwrap());
        let first = app.clone().oneshot(req).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first_id = body_json(first).await["data"]["jobId"].as_str().unwrap().to_owned();

        let mut req = request(
            http::Method::POST,
            &format!("{BASE_PATH}/prompts"),
            Some("req-2"),
            serde_json::json!({ "prompt": "hello" }).to_string(),
        );
        req.headers_mut()
            .insert("idempotency-key", "same-key".parse().unwrap());
        let second = app.oneshot(req).await.unwrap();
        assert_eq!(second.status(), StatusCode::ACCEPTED);
        let second_id = body_json(second).await["data"]["jobId"].as_str().unwrap().to_owned();

        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn bulk_jobs_are_returned_in_submission_order() {
        let app = test_app(2).await;

        let response = app
            .clone()
            .oneshot(request(
                http::Method::POST,
                &format!("{BASE_PATH}/prompts/bulk"),
                Some("req-1"),
                serde_json::json!({
                    "prompts": [{"prompt": "a"}, {"prompt": "b"}, {"prompt": "c"}],
                })
                .to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let accepted = body_json(response).await;
        let batch_id = accepted["data"]["batchId"].as_str().unwrap().to_owned();
        let submitted_ids: Vec<String> = accepted["data"]["jobIds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_owned())
            .collect();

        let response = app
            .oneshot(request(
                http::Method::GET,
                &format!("{BASE_PATH}/batches/{batch_id}"),
                Some("req-2"),
                String::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let batch = body_json(response).await;
        let ordered_ids: Vec<String> = batch["data"]["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["jobId"].as_str().unwrap().to_owned())
            .collect();

        assert_eq!(ordered_ids, submitted_ids);
    }
}

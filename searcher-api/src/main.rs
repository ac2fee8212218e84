use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;

use searcher_common::batch::BatchCoordinator;
use searcher_common::health::HealthRegistry;
use searcher_common::health_aggregator::HealthAggregator;
use searcher_common::idempotency::IdempotencyCache;
use searcher_common::metrics::setup_metrics_routes;
use searcher_common::persistence::{PersistenceClient, RedisPersistence};
use searcher_common::queue::JobQueue;
use searcher_common::retry::RetryPolicy;
use searcher_common::worker_client::{WorkerClient, WorkerTimeouts};

mod config;
mod dto;
mod envelope;
mod error;
mod handlers;
mod middleware;
mod state;

use config::Config;
use state::AppState;

async fn listen(app: Router, bind: String) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store: Arc<dyn PersistenceClient> = Arc::new(
        RedisPersistence::new(&config.core.redis_url)
            .await
            .expect("failed to connect to redis"),
    );

    let retry_policy = RetryPolicy::new(
        2,
        config.core.initial_delay.0,
        config.core.max_delay.0,
    );
    let queue = Arc::new(JobQueue::new(
        store.clone(),
        retry_policy,
        config.core.job_results_ttl_sec,
    ));
    let batches = Arc::new(BatchCoordinator::new(
        store.clone(),
        queue.clone(),
        config.core.job_results_ttl_sec,
    ));
    let idempotency = Arc::new(IdempotencyCache::new(store.clone(), config.core.cache_ttl_sec));

    let worker_count = config.core.worker_base_urls.0.len();
    let worker_client = Arc::new(WorkerClient::new(
        config.core.worker_base_urls.0.clone(),
        WorkerTimeouts {
            health: config.core.worker_health_timeout.0,
            search: config.core.worker_search_timeout.0,
            warmup: config.core.worker_warmup_timeout.0,
            restart: config.core.worker_restart_timeout.0,
            refresh: config.core.worker_refresh_timeout.0,
        },
    ));

    let registry = HealthRegistry::new("liveness");
    let api_handle = registry
        .register("api".to_owned(), time::Duration::seconds(30))
        .await;
    api_handle.report_healthy().await;

    // Keep reporting healthy for as long as the process is actually serving
    // requests; without this the "api" component's `HealthyUntil` deadline
    // elapses 30s after startup and `/health` reports `app: false` forever.
    let heartbeat_handle = api_handle.clone();
    let heartbeat_interval = config.core.health_check_interval.0;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            heartbeat_handle.report_healthy().await;
        }
    });

    let health = Arc::new(HealthAggregator::new(registry, store.clone(), worker_client));

    let app_state = AppState {
        queue,
        batches,
        idempotency,
        health,
        default_max_attempts: config.core.max_attempts,
        worker_count,
    };

    let app = handlers::add_routes(Router::new(), app_state, config.max_body_size);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start searcher-api http server, {}", e),
    }
}

//! Reserve jobs from the durable queue and drive them through the dispatcher.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use searcher_common::dispatcher::Dispatcher;
use searcher_common::health::HealthRegistry;
use searcher_common::metrics::{serve, setup_metrics_routes};
use searcher_common::persistence::{PersistenceClient, RedisPersistence};
use searcher_common::queue::JobQueue;
use searcher_common::retry::RetryPolicy;
use searcher_common::worker_client::{WorkerClient, WorkerTimeouts};

mod config;
mod runner;

use config::Config;
use runner::DispatcherRunner;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let store: Arc<dyn PersistenceClient> = Arc::new(
        RedisPersistence::new(&config.core.redis_url)
            .await
            .expect("failed to connect to redis"),
    );

    let retry_policy = RetryPolicy::new(2, config.core.initial_delay.0, config.core.max_delay.0);
    let queue = Arc::new(JobQueue::new(
        store.clone(),
        retry_policy,
        config.core.job_results_ttl_sec,
    ));

    let worker_urls = config.core.worker_base_urls.0.clone();
    let worker_count = worker_urls.len();

    let worker_client = WorkerClient::new(
        worker_urls,
        WorkerTimeouts {
            health: config.core.worker_health_timeout.0,
            search: config.core.worker_search_timeout.0,
            warmup: config.core.worker_warmup_timeout.0,
            restart: config.core.worker_restart_timeout.0,
            refresh: config.core.worker_refresh_timeout.0,
        },
    );
    let dispatcher = Arc::new(Dispatcher::new(worker_client, config.core.max_attempts));

    let liveness = HealthRegistry::new("liveness");

    // Per spec.md §4.D, the dispatcher pool is sized to the configured
    // worker-endpoint count: one reserve-and-dispatch loop per worker.
    let mut runners = Vec::with_capacity(worker_count);
    for index in 1..=worker_count {
        let handle = liveness
            .register(format!("dispatcher-{index}"), time::Duration::seconds(60))
            .await;
        let runner = DispatcherRunner::new(
            index,
            queue.clone(),
            dispatcher.clone(),
            config.poll_interval.0,
            config.core.job_deadline.0,
            handle,
        );
        runners.push(tokio::spawn(runner.run()));
    }

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind).await.expect("failed to start serving metrics");
    });

    for runner in runners {
        let _ = runner.await;
    }
}

pub async fn index() -> &'static str {
    "prompt dispatch worker"
}

//! Periodic queue maintenance: promotes due retries and reaps stalled
//! reservations (spec.md §4.D). TTL eviction of terminal job/batch/
//! idempotency records is left to the persistence adapter's native `EXPIRE`.

use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use futures::future::{select, Either};

use searcher_common::health::HealthRegistry;
use searcher_common::metrics::setup_metrics_routes;
use searcher_common::persistence::{PersistenceClient, RedisPersistence};
use searcher_common::queue::JobQueue;
use searcher_common::retry::RetryPolicy;

mod config;
mod handlers;
mod sweeper;

use config::Config;
use sweeper::StallSweeper;

async fn listen(app: Router, bind: String) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await
}

async fn sweep_loop(sweeper: StallSweeper, interval: std::time::Duration, liveness: searcher_common::health::HealthHandle) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        liveness.report_healthy().await;
        if let Err(error) = sweeper.sweep().await {
            tracing::error!("stall sweeper cycle failed: {}", error);
        }
    }
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

    let retry_policy = RetryPolicy::new(2, config.core.initial_delay.0, config.core.max_delay.0);
    let queue = Arc::new(JobQueue::new(
        store.clone(),
        retry_policy,
        config.core.job_results_ttl_sec,
    ));

    let liveness = HealthRegistry::new("liveness");
    let sweep_liveness = liveness
        .register("stall_sweeper".to_owned(), time::Duration::seconds(60))
        .await;

    let sweeper = StallSweeper::new(queue);
    let sweep_loop = Box::pin(sweep_loop(sweeper, config.sweep_interval.0, sweep_liveness));

    let app = setup_metrics_routes(handlers::app::app(liveness));
    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, sweep_loop).await {
        Either::Left((listen_result, _)) => {
            if let Err(e) = listen_result {
                tracing::error!("failed to start searcher-janitor http server, {}", e);
            }
        }
        Either::Right((_, _)) => {
            tracing::error!("searcher-janitor sweep loop exited");
        }
    }
}

//! # Health aggregator
//!
//! Assembles the `/health` payload exposed by the API: the process's own
//! liveness (via `HealthRegistry`), the persistence round-trip latency, and a
//! parallel probe of every configured worker. Grounded on
//! `hook-api`'s health route composing `HealthRegistry::get_status` with
//! downstream checks; the worker fan-out itself is modeled on
//! `hook-worker::worker::WebhookWorker`'s use of `futures::future::join_all`.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::health::HealthRegistry;
use crate::persistence::PersistenceClient;
use crate::worker_client::{WorkerClient, WorkerHealth};

#[derive(Debug, Clone, Serialize)]
pub struct RedisHealth {
    pub ok: bool,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealthReport {
    pub index: usize,
    #[serde(flatten)]
    pub health: WorkerHealth,
}

/// Aggregate view of the worker pool, per spec.md §4.G: `status` is `ok` iff
/// every worker reported healthy, `degraded` if only some did, `fail` if
/// none did (including the degenerate case of no configured workers).
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolHealth {
    pub total: usize,
    pub healthy: usize,
    pub busy: usize,
    pub status: &'static str,
    pub details: Vec<WorkerHealthReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateHealth {
    pub app: bool,
    pub redis: RedisHealth,
    pub workers: WorkerPoolHealth,
}

pub struct HealthAggregator {
    registry: HealthRegistry,
    store: Arc<dyn PersistenceClient>,
    worker_client: Arc<WorkerClient>,
}

impl HealthAggregator {
    pub fn new(registry: HealthRegistry, store: Arc<dyn PersistenceClient>, worker_client: Arc<WorkerClient>) -> Self {
        Self {
            registry,
            store,
            worker_client,
        }
    }

    pub async fn check(&self) -> AggregateHealth {
        let app = self.registry.get_status().healthy;

        let redis = match self.store.ping().await {
            Ok(latency_ms) => RedisHealth {
                ok: true,
                latency_ms: Some(latency_ms),
                error: None,
            },
            Err(error) => RedisHealth {
                ok: false,
                latency_ms: None,
                error: Some(error.to_string()),
            },
        };

        let worker_count = self.worker_client.worker_count();
        let healths = join_all((1..=worker_count).map(|index| self.worker_client.health(index))).await;
        let details: Vec<WorkerHealthReport> = healths
            .into_iter()
            .enumerate()
            .map(|(i, health)| WorkerHealthReport { index: i + 1, health })
            .collect();

        let healthy = details.iter().filter(|w| w.health.ok).count();
        let busy = details.iter().filter(|w| w.health.busy).count();
        let status = if worker_count == 0 || healthy == 0 {
            "fail"
        } else if healthy == worker_count {
            "ok"
        } else {
            "degraded"
        };

        AggregateHealth {
            app,
            redis,
            workers: WorkerPoolHealth {
                total: worker_count,
                healthy,
                busy,
                status,
                details,
            },
        }
    }
}

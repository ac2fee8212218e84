use std::sync::Arc;

use searcher_common::batch::BatchCoordinator;
use searcher_common::health_aggregator::HealthAggregator;
use searcher_common::idempotency::IdempotencyCache;
use searcher_common::queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub batches: Arc<BatchCoordinator>,
    pub idempotency: Arc<IdempotencyCache>,
    pub health: Arc<HealthAggregator>,
    pub default_max_attempts: u32,
    pub worker_count: usize,
}

pub mod batch;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod health;
pub mod health_aggregator;
pub mod idempotency;
pub mod job;
pub mod metrics;
pub mod persistence;
pub mod queue;
pub mod retry;
pub mod worker_client;

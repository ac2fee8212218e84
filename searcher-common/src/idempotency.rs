//! # Admission / idempotency cache
//!
//! Clients may retry a submission (e.g. after a timeout) using the same
//! idempotency key. The cache maps that key to the job or batch id it first
//! produced, so a retried request is answered from cache instead of
//! re-dispatching the prompt. Grounded on the `setnx`+`expire` admission
//! pattern used by `feature-flags/src/redis.rs` for cache population.

use std::sync::Arc;

use crate::persistence::{CustomPersistenceError, PersistenceClient};

pub type IdempotencyResult<T> = Result<T, CustomPersistenceError>;

/// Outcome of attempting to admit a request under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The key was unseen; the caller should proceed and later call `remember`.
    Miss,
    /// The key was already associated with this id; the caller should
    /// short-circuit and return it without re-dispatching.
    Hit(String),
}

fn key_for(idempotency_key: &str) -> String {
    format!("idempotency:{idempotency_key}")
}

pub struct IdempotencyCache {
    store: Arc<dyn PersistenceClient>,
    ttl_sec: u64,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn PersistenceClient>, ttl_sec: u64) -> Self {
        Self { store, ttl_sec }
    }

    /// Atomically reserve `idempotency_key` for `id`. Returns `Hit` with the
    /// id that actually won the race if another request got there first.
    pub async fn admit(&self, idempotency_key: &str, id: &str) -> IdempotencyResult<Admission> {
        let key = key_for(idempotency_key);
        if self.store.setnx_ex(&key, id, self.ttl_sec).await? {
            return Ok(Admission::Miss);
        }
        match self.store.get(&key).await? {
            Some(existing) => Ok(Admission::Hit(existing)),
            None => Ok(Admission::Miss),
        }
    }

    pub async fn lookup(&self, idempotency_key: &str) -> IdempotencyResult<Option<String>> {
        self.store.get(&key_for(idempotency_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockPersistence;

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(Arc::new(MockPersistence::new()), 3600)
    }

    #[tokio::test]
    async fn first_admission_is_a_miss() {
        let cache = cache();
        assert_eq!(cache.admit("key-1", "job-1").await.unwrap(), Admission::Miss);
    }

    #[tokio::test]
    async fn repeated_admission_returns_the_winning_id() {
        let cache = cache();
        assert_eq!(cache.admit("key-1", "job-1").await.unwrap(), Admission::Miss);
        assert_eq!(
            cache.admit("key-1", "job-2").await.unwrap(),
            Admission::Hit("job-1".to_owned())
        );
        assert_eq!(cache.lookup("key-1").await.unwrap(), Some("job-1".to_owned()));
    }
}

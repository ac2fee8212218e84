//! # Persistence
//!
//! A thin contract over the external key/value store backing the job queue.
//! The real implementation talks to Redis; `MockPersistence` is an in-memory
//! stand-in used by the rest of the workspace's tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

const DEFAULT_REDIS_TIMEOUT_MS: u64 = 250;

/// Enumeration of errors that can occur when talking to the persistence adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustomPersistenceError {
    #[error("key not found")]
    NotFound,
    #[error("persistence operation timed out")]
    Timeout,
    #[error("persistence error: {0}")]
    Other(String),
}

impl From<redis::RedisError> for CustomPersistenceError {
    fn from(error: redis::RedisError) -> Self {
        CustomPersistenceError::Other(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CustomPersistenceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CustomPersistenceError::Timeout
    }
}

pub type PersistenceResult<T> = Result<T, CustomPersistenceError>;

/// Contract over the external key/value store.
///
/// Covers: string `GET/SET/SETEX/SETNX`, list `RPUSH/LPOP/LRANGE/LLEN`,
/// sorted-set `ZADD/ZRANGEBYSCORE/ZREM`, set `SADD/SMEMBERS`, `EXPIRE`, and
/// `PING`. All operations are reentrant and safe for concurrent callers.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()>;
    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> PersistenceResult<()>;
    /// Atomic SETNX+EXPIRE: sets `key` only if absent, attaching a TTL in the same operation.
    /// Returns `true` if the key was set, `false` if it already existed.
    async fn setnx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> PersistenceResult<bool>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> PersistenceResult<()>;
    async fn del(&self, key: &str) -> PersistenceResult<()>;

    async fn rpush(&self, key: &str, value: &str) -> PersistenceResult<()>;
    async fn lpop(&self, key: &str) -> PersistenceResult<Option<String>>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> PersistenceResult<Vec<String>>;
    async fn llen(&self, key: &str) -> PersistenceResult<u64>;
    /// Remove the first occurrence of `value` from the list at `key`.
    async fn lrem(&self, key: &str, value: &str) -> PersistenceResult<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> PersistenceResult<()>;
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> PersistenceResult<Vec<String>>;
    async fn zrem(&self, key: &str, member: &str) -> PersistenceResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> PersistenceResult<()>;
    async fn smembers(&self, key: &str) -> PersistenceResult<Vec<String>>;

    /// Round-trip ping, returning elapsed milliseconds.
    async fn ping(&self) -> PersistenceResult<f64>;
}

fn redis_timeout_ms() -> u64 {
    std::env::var("REDIS_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_REDIS_TIMEOUT_MS)
}

/// Real persistence adapter backed by a Redis-compatible server.
pub struct RedisPersistence {
    connection: MultiplexedConnection,
}

impl RedisPersistence {
    pub async fn new(addr: &str) -> PersistenceResult<Self> {
        let client = redis::Client::open(addr)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl PersistenceClient for RedisPersistence {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let mut conn = self.connection.clone();
        let fut = conn.get(key);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.set(key, value);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.set_ex(key, value, ttl_secs);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn setnx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> PersistenceResult<bool> {
        let mut conn = self.connection.clone();
        let result: Option<String> = timeout(
            Duration::from_millis(redis_timeout_ms()),
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .arg("NX")
                .query_async(&mut conn),
        )
        .await??;

        Ok(result.is_some())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.expire(key, ttl_secs as i64);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn del(&self, key: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.del(key);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn rpush(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.rpush(key, value);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn lpop(&self, key: &str) -> PersistenceResult<Option<String>> {
        let mut conn = self.connection.clone();
        let fut = conn.lpop(key, None);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> PersistenceResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let fut = conn.lrange(key, start, stop);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn llen(&self, key: &str) -> PersistenceResult<u64> {
        let mut conn = self.connection.clone();
        let fut = conn.llen(key);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn lrem(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.lrem(key, 1, value);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.zadd(key, member, score);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> PersistenceResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let fut = conn.zrangebyscore(key, min, max);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn zrem(&self, key: &str, member: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.zrem(key, member);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn sadd(&self, key: &str, member: &str) -> PersistenceResult<()> {
        let mut conn = self.connection.clone();
        let fut = conn.sadd(key, member);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn smembers(&self, key: &str) -> PersistenceResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let fut = conn.smembers(key);
        Ok(timeout(Duration::from_millis(redis_timeout_ms()), fut).await??)
    }

    async fn ping(&self) -> PersistenceResult<f64> {
        let mut conn = self.connection.clone();
        let start = std::time::Instant::now();
        let fut = redis::cmd("PING").query_async::<_, String>(&mut conn);
        timeout(Duration::from_millis(redis_timeout_ms()), fut).await??;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

/// In-memory stand-in for `PersistenceClient`, used by tests across the workspace.
#[derive(Default, Clone)]
pub struct MockPersistence {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    sets: HashMap<String, Vec<String>>,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceClient for MockPersistence {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.inner.lock().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.inner
            .lock()
            .await
            .strings
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, _ttl_secs: u64) -> PersistenceResult<()> {
        self.set(key, value).await
    }

    async fn setnx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> PersistenceResult<bool> {
        let mut state = self.inner.lock().await;
        if state.strings.contains_key(key) {
            Ok(false)
        } else {
            state.strings.insert(key.to_owned(), value.to_owned());
            Ok(true)
        }
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> PersistenceResult<()> {
        Ok(())
    }

    async fn del(&self, key: &str) -> PersistenceResult<()> {
        let mut state = self.inner.lock().await;
        state.strings.remove(key);
        state.lists.remove(key);
        state.zsets.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.inner
            .lock()
            .await
            .lists
            .entry(key.to_owned())
            .or_default()
            .push(value.to_owned());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> PersistenceResult<Option<String>> {
        let mut state = self.inner.lock().await;
        match state.lists.get_mut(key) {
            Some(list) if !list.is_empty() => Ok(Some(list.remove(0))),
            _ => Ok(None),
        }
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> PersistenceResult<Vec<String>> {
        let state = self.inner.lock().await;
        let list = match state.lists.get(key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as isize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let normalize = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len - 1)
            }
        };
        let start = normalize(start);
        let stop = normalize(stop);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..=stop as usize].to_vec())
    }

    async fn llen(&self, key: &str) -> PersistenceResult<u64> {
        let state = self.inner.lock().await;
        Ok(state.lists.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    async fn lrem(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut state = self.inner.lock().await;
        if let Some(list) = state.lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|v| v == value) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> PersistenceResult<()> {
        let mut state = self.inner.lock().await;
        let set = state.zsets.entry(key.to_owned()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_owned(), score));
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> PersistenceResult<Vec<String>> {
        let state = self.inner.lock().await;
        let mut results: Vec<(String, f64)> = state
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(results.into_iter().map(|(m, _)| m).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> PersistenceResult<()> {
        let mut state = self.inner.lock().await;
        if let Some(set) = state.zsets.get_mut(key) {
            set.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> PersistenceResult<()> {
        let mut state = self.inner.lock().await;
        let set = state.sets.entry(key.to_owned()).or_default();
        if !set.iter().any(|m| m == member) {
            set.push(member.to_owned());
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> PersistenceResult<Vec<String>> {
        let state = self.inner.lock().await;
        Ok(state.sets.get(key).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> PersistenceResult<f64> {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setnx_ex_is_set_once() {
        let store = MockPersistence::new();
        assert!(store.setnx_ex("k", "v1", 60).await.unwrap());
        assert!(!store.setnx_ex("k", "v2", 60).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v1".to_owned()));
    }

    #[tokio::test]
    async fn list_push_pop_is_fifo() {
        let store = MockPersistence::new();
        store.rpush("q", "a").await.unwrap();
        store.rpush("q", "b").await.unwrap();
        assert_eq!(store.lpop("q").await.unwrap(), Some("a".to_owned()));
        assert_eq!(store.lpop("q").await.unwrap(), Some("b".to_owned()));
        assert_eq!(store.lpop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zrangebyscore_orders_by_score() {
        let store = MockPersistence::new();
        store.zadd("z", "late", 200.0).await.unwrap();
        store.zadd("z", "early", 100.0).await.unwrap();
        let members = store.zrangebyscore("z", 0.0, 1000.0).await.unwrap();
        assert_eq!(members, vec!["early".to_owned(), "late".to_owned()]);
    }

    #[tokio::test]
    async fn set_members_are_deduplicated() {
        let store = MockPersistence::new();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();
        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_owned(), "b".to_owned()]);
    }
}

//! Deadline enforcement for cache calls
//!
//! Every component talks to the cache through [`CacheGuard`], which bounds
//! each call with the configured timeout and reports an overrun as
//! [`CacheError::Timeout`]. Callers decide whether a failure opens or closes.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{CacheEffects, CacheError};

/// Cache decorator that applies a per-call deadline
#[derive(Clone)]
pub struct CacheGuard {
    inner: Arc<dyn CacheEffects>,
    timeout: Duration,
}

impl CacheGuard {
    /// Wrap `inner` with a per-call deadline
    pub fn new(inner: Arc<dyn CacheEffects>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        T: Send,
        F: Future<Output = Result<T, CacheError>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl CacheEffects for CacheGuard {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.bounded(self.inner.set(key, value, ttl)).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.bounded(self.inner.set_if_absent(key, value, ttl)).await
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.bounded(self.inner.set_many(entries, ttl)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.bounded(self.inner.incr_by(key, delta)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.bounded(self.inner.expire(key, ttl)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.bounded(self.inner.delete(keys)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.bounded(self.inner.delete_prefix(prefix)).await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        self.bounded(self.inner.list_push(key, value)).await
    }

    async fn list_pop_front(&self, key: &str, max: usize) -> Result<Vec<String>, CacheError> {
        self.bounded(self.inner.list_pop_front(key, max)).await
    }

    async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        self.bounded(self.inner.list_len(key)).await
    }
}

/// Parse a cached integer counter. Absent reads as zero.
pub(crate) fn parse_count(key: &str, raw: Option<String>) -> Result<u64, CacheError> {
    match raw {
        None => Ok(0),
        Some(text) => text
            .trim()
            .parse::<i64>()
            .map(|value| u64::try_from(value).unwrap_or(0))
            .map_err(|_| CacheError::corrupt(key, format!("not a counter: {text}"))),
    }
}

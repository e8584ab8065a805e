//! Counter cache effect trait
//!
//! The cache is the source of truth for every mutable counter. Only two of its
//! primitives are mutual-exclusion points: `set_if_absent` (dedup claims) and
//! `incr_by` (counter updates). `set_many` is atomic so that a tier swap and
//! its consumption reset land together. Everything else is a plain
//! read-then-write.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `tally-effects` (in-memory, Redis)
//! - **Usage**: dedup gate, token limiter, budget ledger, access log buffer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Error type for cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CacheError {
    /// Backend refused or dropped the connection
    #[error("Cache unavailable: {reason}")]
    Unavailable {
        /// Backend-specific reason
        reason: String,
    },
    /// Operation exceeded its deadline
    #[error("Cache timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded
        timeout_ms: u64,
    },
    /// Stored value could not be interpreted
    #[error("Corrupt cache value at '{key}': {reason}")]
    Corrupt {
        /// Offending key
        key: String,
        /// Parse failure
        reason: String,
    },
}

impl CacheError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a corrupt-value error
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Shared key/value cache with expiring entries, atomic counters and list buffers.
#[async_trait]
pub trait CacheEffects: Send + Sync {
    /// Read a string value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Unconditionally write a value, replacing any expiry with `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write only if the key is absent. Returns `true` only for the caller
    /// that created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;

    /// Write several values in one atomic step.
    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Atomically add `delta` to an integer value (absent reads as zero) and
    /// return the new value. The expiry of an existing key is preserved.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Set an expiry on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Delete every key starting with `prefix`, returning how many existed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Append to the tail of a list, returning its new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CacheError>;

    /// Remove and return up to `max` values from the head of a list.
    async fn list_pop_front(&self, key: &str, max: usize) -> Result<Vec<String>, CacheError>;

    /// Current list length.
    async fn list_len(&self, key: &str) -> Result<u64, CacheError>;
}

/// Blanket implementation for Arc<T> where T: CacheEffects
#[async_trait]
impl<T: CacheEffects + ?Sized> CacheEffects for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        (**self).set_many(entries, ttl).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        (**self).incr_by(key, delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        (**self).expire(key, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        (**self).delete(keys).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        (**self).delete_prefix(prefix).await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        (**self).list_push(key, value).await
    }

    async fn list_pop_front(&self, key: &str, max: usize) -> Result<Vec<String>, CacheError> {
        (**self).list_pop_front(key, max).await
    }

    async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        (**self).list_len(key).await
    }
}

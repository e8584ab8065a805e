//! Redis cache handler
//!
//! Shared counter cache for multi-instance deployments. One multiplexed
//! connection is cloned per call. Deadlines are enforced one layer up by the
//! metering crate's cache guard, so calls here never time out on their own.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tally_core::effects::{CacheEffects, CacheError};
use tracing::{info, warn};

const SCAN_BATCH: usize = 200;

/// Whether a Redis error means the connection itself is unusable
fn is_connection_error(err: &redis::RedisError) -> bool {
    if matches!(
        err.kind(),
        redis::ErrorKind::IoError | redis::ErrorKind::BusyLoadingError
    ) {
        return true;
    }
    err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

fn classify(key: &str, err: redis::RedisError) -> CacheError {
    if is_connection_error(&err) {
        warn!(error = %err, "Redis connection error");
        return CacheError::unavailable(err.to_string());
    }
    match err.kind() {
        redis::ErrorKind::TypeError | redis::ErrorKind::ResponseError => {
            CacheError::corrupt(key, err.to_string())
        }
        _ => CacheError::unavailable(err.to_string()),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so a literal prefix can be used with `SCAN MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

/// Redis-backed cache handler
#[derive(Clone)]
pub struct RedisCacheHandler {
    conn: MultiplexedConnection,
}

impl RedisCacheHandler {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        info!("Connected to Redis counter cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheEffects for RedisCacheHandler {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(reply.is_some())
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&entries[0].0, e))?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(applied == 1)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&keys[0], e))?;
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = glob_escape(prefix);
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify(prefix, e))?;
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| classify(prefix, e))?;
                removed += count;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(len)
    }

    async fn list_pop_front(&self, key: &str, max: usize) -> Result<Vec<String>, CacheError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let popped: Option<Vec<String>> = redis::cmd("LPOP")
            .arg(key)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(popped.unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(len)
    }
}

//! In-memory cache handler
//!
//! Single-process stand-in for the shared counter cache. Expiry is driven by
//! the injected clock so simulated time can roll windows and dedup claims
//! forward. Every operation runs under one write lock, which makes the
//! atomic primitives trivially atomic.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{CacheEffects, CacheError, PhysicalTimeEffects};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

/// In-memory cache handler for tests and simulation
pub struct MemoryCacheHandler {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn PhysicalTimeEffects>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    failing_increments: AtomicU64,
}

impl MemoryCacheHandler {
    /// Create an empty cache whose expiries follow `clock`
    pub fn new(clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            clock,
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failing_increments: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail as if the backend were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every subsequent call by real wall-clock time
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Fail the next `count` increments while every other call keeps working
    pub fn fail_next_increments(&self, count: u64) {
        self.failing_increments.store(count, Ordering::SeqCst);
    }

    /// Number of live keys
    pub async fn key_count(&self) -> usize {
        let Ok(now) = self.clock.current_timestamp_ms().await else {
            return 0;
        };
        self.data
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Remaining lifetime of a key, if it is live and has an expiry
    pub async fn ttl_ms(&self, key: &str) -> Option<u64> {
        let now = self.clock.current_timestamp_ms().await.ok()?;
        let data = self.data.read().await;
        let entry = data.get(key).filter(|entry| entry.is_live(now))?;
        entry.expires_at_ms.map(|at| at.saturating_sub(now))
    }

    async fn enter(&self) -> Result<u64, CacheError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("memory cache is offline"));
        }
        self.clock
            .current_timestamp_ms()
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }
}

fn expiry(now_ms: u64, ttl: Duration) -> u64 {
    now_ms.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

fn live<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &str,
    now_ms: u64,
) -> Option<&'a mut Entry> {
    if data.get(key).is_some_and(|entry| !entry.is_live(now_ms)) {
        data.remove(key);
    }
    data.get_mut(key)
}

#[async_trait]
impl CacheEffects for MemoryCacheHandler {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        match live(&mut data, key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(CacheError::corrupt(key, "value is a list")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at_ms: ttl.map(|ttl| expiry(now, ttl)),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        if live(&mut data, key, now).is_some() {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at_ms: Some(expiry(now, ttl)),
            },
        );
        Ok(true)
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        for (key, value) in entries {
            data.insert(
                key.clone(),
                Entry {
                    value: Value::Text(value.clone()),
                    expires_at_ms: ttl.map(|ttl| expiry(now, ttl)),
                },
            );
        }
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let now = self.enter().await?;
        if self
            .failing_increments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CacheError::unavailable("increment rejected"));
        }
        let mut data = self.data.write().await;
        match live(&mut data, key, now) {
            None => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text(delta.to_string()),
                        expires_at_ms: None,
                    },
                );
                Ok(delta)
            }
            Some(entry) => {
                let Value::Text(text) = &mut entry.value else {
                    return Err(CacheError::corrupt(key, "value is a list"));
                };
                let current: i64 = text
                    .parse()
                    .map_err(|_| CacheError::corrupt(key, "value is not an integer"))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::corrupt(key, "increment overflows"))?;
                *text = next.to_string();
                Ok(next)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        match live(&mut data, key, now) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at_ms = Some(expiry(now, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = data.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        let mut removed = 0;
        data.retain(|key, entry| {
            if !key.starts_with(prefix) {
                return true;
            }
            if entry.is_live(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        if live(&mut data, key, now).is_none() {
            data.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at_ms: None,
                },
            );
        }
        match data.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::List(list)) => {
                list.push_back(value.to_string());
                Ok(list.len() as u64)
            }
            _ => Err(CacheError::corrupt(key, "value is not a list")),
        }
    }

    async fn list_pop_front(&self, key: &str, max: usize) -> Result<Vec<String>, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        let popped = match live(&mut data, key, now) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let take = max.min(list.len());
                list.drain(..take).collect::<Vec<_>>()
            }
            Some(_) => return Err(CacheError::corrupt(key, "value is not a list")),
        };
        if matches!(data.get(key), Some(Entry { value: Value::List(list), .. }) if list.is_empty())
        {
            data.remove(key);
        }
        Ok(popped)
    }

    async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        let now = self.enter().await?;
        let mut data = self.data.write().await;
        match live(&mut data, key, now) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(CacheError::corrupt(key, "value is not a list")),
        }
    }
}

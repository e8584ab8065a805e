//! Write-behind access logger
//!
//! Admission decisions are pushed onto a cache-backed list and appended to
//! the durable store in batches. The request path never waits on either:
//! [`AccessLogger::log_access`] hands the push to the task spawner and
//! returns.
//!
//! Entries that cannot reach the cache are held in a bounded in-process
//! buffer and drained first on the next flush. Logs are analytics, not the
//! billing record, so overflow and crash loss are tolerated.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tally_core::config::AccessLogConfig;
use tally_core::effects::{CacheEffects, LedgerEffects, PhysicalTimeEffects, TaskSpawner};
use tally_core::{keys, AccessLogEntry, Result, TallyError};
use tracing::{debug, info, warn};

/// Counters for logger activity
#[derive(Debug, Default)]
pub struct AccessLogStatistics {
    /// Entries accepted into either buffer
    pub buffered: AtomicU64,
    /// Entries appended to the durable store
    pub flushed: AtomicU64,
    /// Entries lost to fallback overflow or corruption
    pub dropped: AtomicU64,
}

/// Buffered access logger
pub struct AccessLogger {
    cache: Arc<dyn CacheEffects>,
    store: Arc<dyn LedgerEffects>,
    spawner: Arc<dyn TaskSpawner>,
    config: AccessLogConfig,
    fallback: Mutex<VecDeque<AccessLogEntry>>,
    flush_scheduled: AtomicBool,
    stats: AccessLogStatistics,
}

impl AccessLogger {
    /// Create a logger
    pub fn new(
        cache: Arc<dyn CacheEffects>,
        store: Arc<dyn LedgerEffects>,
        spawner: Arc<dyn TaskSpawner>,
        config: AccessLogConfig,
    ) -> Self {
        Self {
            cache,
            store,
            spawner,
            config,
            fallback: Mutex::new(VecDeque::new()),
            flush_scheduled: AtomicBool::new(false),
            stats: AccessLogStatistics::default(),
        }
    }

    /// Queue an entry without waiting for the buffer write
    pub fn log_access(self: &Arc<Self>, entry: AccessLogEntry) {
        let logger = Arc::clone(self);
        self.spawner
            .spawn(async move { logger.append(entry).await }.boxed());
    }

    /// Buffer an entry and schedule a flush once the threshold is reached
    pub async fn append(self: &Arc<Self>, entry: AccessLogEntry) {
        let raw = match entry.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping unserializable access log entry");
                return;
            }
        };

        let buffered = match self.cache.list_push(keys::ACCESS_LOG_BUFFER, &raw).await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Access log buffer unavailable, holding entry in process");
                if !self.hold(entry) {
                    return;
                }
                self.fallback.lock().len() as u64
            }
        };
        self.stats.buffered.fetch_add(1, Ordering::Relaxed);

        if buffered >= self.config.flush_threshold {
            self.schedule_flush();
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let logger = Arc::clone(self);
        self.spawner.spawn(
            async move {
                if let Err(e) = logger.flush().await {
                    warn!(error = %e, "Scheduled access log flush failed");
                }
                logger.flush_scheduled.store(false, Ordering::Release);
            }
            .boxed(),
        );
    }

    fn hold(&self, entry: AccessLogEntry) -> bool {
        let mut fallback = self.fallback.lock();
        if fallback.len() >= self.config.fallback_capacity {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                capacity = self.config.fallback_capacity,
                "Access log fallback full, dropping entry"
            );
            return false;
        }
        fallback.push_back(entry);
        true
    }

    /// Drain both buffers into the durable store.
    ///
    /// Returns the number of entries appended. A store failure puts the
    /// failed batch back and stops the flush; the next flush retries it.
    pub async fn flush(&self) -> Result<usize> {
        let mut flushed = 0;

        loop {
            let held: Vec<AccessLogEntry> = {
                let mut fallback = self.fallback.lock();
                let take = fallback.len().min(self.config.flush_batch_size.max(1));
                fallback.drain(..take).collect()
            };
            if held.is_empty() {
                break;
            }
            flushed += self.append_batch(held).await?;
        }

        loop {
            let raw = match self
                .cache
                .list_pop_front(keys::ACCESS_LOG_BUFFER, self.config.flush_batch_size)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Access log buffer unreadable, flush deferred");
                    break;
                }
            };
            if raw.is_empty() {
                break;
            }

            let batch: Vec<AccessLogEntry> = raw
                .iter()
                .filter_map(|line| match AccessLogEntry::from_json(line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Skipping corrupt access log entry");
                        None
                    }
                })
                .collect();
            if batch.is_empty() {
                continue;
            }
            flushed += self.append_batch(batch).await?;
        }

        if flushed > 0 {
            info!(entries = flushed, "Access log flushed");
        }
        Ok(flushed)
    }

    async fn append_batch(&self, batch: Vec<AccessLogEntry>) -> Result<usize> {
        match self.store.append_access_logs(&batch).await {
            Ok(appended) => {
                self.stats
                    .flushed
                    .fetch_add(appended as u64, Ordering::Relaxed);
                debug!(entries = appended, "Access log batch appended");
                Ok(appended)
            }
            Err(e) => {
                let count = batch.len();
                self.requeue(batch).await;
                warn!(entries = count, error = %e, "Access log append failed, batch re-queued");
                Err(TallyError::from(e))
            }
        }
    }

    async fn requeue(&self, batch: Vec<AccessLogEntry>) {
        for entry in batch {
            let pushed = match entry.to_json() {
                Ok(raw) => self
                    .cache
                    .list_push(keys::ACCESS_LOG_BUFFER, &raw)
                    .await
                    .is_ok(),
                Err(_) => false,
            };
            if !pushed {
                self.hold(entry);
            }
        }
    }

    /// Flush every `flush_interval` until the returned future is dropped
    pub fn periodic_flush(
        self: Arc<Self>,
        clock: Arc<dyn PhysicalTimeEffects>,
    ) -> BoxFuture<'static, ()> {
        let interval_ms =
            u64::try_from(self.config.flush_interval().as_millis()).unwrap_or(u64::MAX);
        async move {
            loop {
                if let Err(e) = clock.sleep_ms(interval_ms).await {
                    warn!(error = %e, "Periodic access log flush stopped");
                    return;
                }
                if let Err(e) = self.flush().await {
                    warn!(error = %e, "Periodic access log flush failed");
                }
            }
        }
        .boxed()
    }

    /// Entries waiting in the cache buffer
    pub async fn buffered_len(&self) -> Result<u64> {
        Ok(self.cache.list_len(keys::ACCESS_LOG_BUFFER).await?)
    }

    /// Entries held in process while the cache was unavailable
    pub fn fallback_len(&self) -> usize {
        self.fallback.lock().len()
    }

    /// Logger activity counters
    pub fn statistics(&self) -> &AccessLogStatistics {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{ContentId, MicroUsd, Tier, VisitorFingerprint};
    use tally_effects::{
        DeferredSpawner, MemoryCacheHandler, MemoryLedgerHandler, SimulatedTimeHandler,
    };

    const NOON: u64 = 1_792_411_200_000;

    struct Fixture {
        logger: Arc<AccessLogger>,
        cache: Arc<MemoryCacheHandler>,
        store: Arc<MemoryLedgerHandler>,
        spawner: Arc<DeferredSpawner>,
    }

    fn fixture(config: AccessLogConfig) -> Fixture {
        let clock = Arc::new(SimulatedTimeHandler::new(NOON));
        let cache = Arc::new(MemoryCacheHandler::new(clock));
        let store = Arc::new(MemoryLedgerHandler::new());
        let spawner = Arc::new(DeferredSpawner::new());
        Fixture {
            logger: Arc::new(AccessLogger::new(
                cache.clone(),
                store.clone(),
                spawner.clone(),
                config,
            )),
            cache,
            store,
            spawner,
        }
    }

    fn small_config() -> AccessLogConfig {
        AccessLogConfig {
            flush_threshold: 3,
            flush_batch_size: 2,
            fallback_capacity: 2,
            ..AccessLogConfig::default()
        }
    }

    fn entry(n: u64) -> AccessLogEntry {
        AccessLogEntry {
            content_id: ContentId::new("c1"),
            fingerprint: VisitorFingerprint::new(format!("fp-{n}")),
            owner_tier: Tier::Premium,
            is_overage: false,
            session_cost: MicroUsd::new(25_000),
            is_ai_enabled: false,
            timestamp_ms: NOON + n,
        }
    }

    #[tokio::test]
    async fn log_access_does_not_write_until_spawned_work_runs() {
        let f = fixture(small_config());
        f.logger.log_access(entry(1));
        assert_eq!(f.logger.buffered_len().await.unwrap(), 0);

        f.spawner.run_pending().await;
        assert_eq!(f.logger.buffered_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn threshold_triggers_a_detached_flush() {
        let f = fixture(small_config());
        for n in 0..3 {
            f.logger.log_access(entry(n));
        }
        f.spawner.run_pending().await;

        let logs = f.store.access_logs().await;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0], entry(0));
        assert_eq!(f.logger.buffered_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_requeues_the_batch() {
        let f = fixture(small_config());
        for n in 0..2 {
            f.logger.append(entry(n)).await;
        }

        f.store.set_offline(true);
        assert!(matches!(
            f.logger.flush().await,
            Err(TallyError::StoreUnavailable { .. })
        ));
        assert_eq!(f.logger.buffered_len().await.unwrap(), 2);

        f.store.set_offline(false);
        assert_eq!(f.logger.flush().await.unwrap(), 2);
        assert_eq!(f.store.access_logs().await.len(), 2);
    }

    #[tokio::test]
    async fn cache_outage_uses_bounded_fallback() {
        let f = fixture(small_config());
        f.cache.set_offline(true);
        for n in 0..3 {
            f.logger.append(entry(n)).await;
        }
        assert_eq!(f.logger.fallback_len(), 2);
        assert_eq!(f.logger.statistics().dropped.load(Ordering::Relaxed), 1);

        f.cache.set_offline(false);
        assert_eq!(f.logger.flush().await.unwrap(), 2);
        assert_eq!(f.logger.fallback_len(), 0);
    }

    #[tokio::test]
    async fn corrupt_buffer_entries_are_skipped() {
        let f = fixture(small_config());
        f.cache
            .list_push(keys::ACCESS_LOG_BUFFER, "not json")
            .await
            .unwrap();
        f.logger.append(entry(7)).await;

        assert_eq!(f.logger.flush().await.unwrap(), 1);
        assert_eq!(f.store.access_logs().await, vec![entry(7)]);
    }

    #[tokio::test]
    async fn periodic_flush_drains_on_interval() {
        let clock = Arc::new(SimulatedTimeHandler::new(NOON));
        let cache = Arc::new(MemoryCacheHandler::new(clock.clone()));
        let store = Arc::new(MemoryLedgerHandler::new());
        let logger = Arc::new(AccessLogger::new(
            cache,
            store.clone(),
            Arc::new(DeferredSpawner::new()),
            AccessLogConfig::default(),
        ));
        logger.append(entry(1)).await;

        let task = tokio::spawn(logger.clone().periodic_flush(clock.clone()));
        while store.access_logs().await.is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(clock.get_time() >= NOON + 60_000);
    }
}

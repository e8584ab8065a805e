//! Token admission limiter
//!
//! Per-distribution-token daily and monthly caps, independent of the owner's
//! billing tier.
//!
//! Checks and records are split. A check is a plain read-and-compare; the
//! counter moves only after the whole pipeline admits the session. Two
//! concurrent requests can therefore both read "under limit" and both be
//! admitted, overshooting the cap by at most the number of in-flight
//! requests. That bounded overshoot is accepted in exchange for a single
//! round trip and no reservation/rollback protocol.

use crate::cache_guard::parse_count;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::config::SessionConfig;
use tally_core::effects::CacheEffects;
use tally_core::{keys, AdmissionCheck, BillingWindow, DailyAccessStats, Result, TokenId};
use tracing::{debug, info, warn};

/// Counters for limiter activity
#[derive(Debug, Default)]
pub struct LimiterStatistics {
    /// Checks that found the window full
    pub denials: AtomicU64,
    /// Checks admitted because the cache failed
    pub fail_open: AtomicU64,
}

/// Per-token daily/monthly admission limiter
pub struct TokenLimiter {
    cache: Arc<dyn CacheEffects>,
    daily_ttl: Duration,
    monthly_ttl: Duration,
    stats: LimiterStatistics,
}

impl TokenLimiter {
    /// Create a limiter with counter lifetimes from `session`
    pub fn new(cache: Arc<dyn CacheEffects>, session: &SessionConfig) -> Self {
        Self {
            cache,
            daily_ttl: session.daily_counter_ttl(),
            monthly_ttl: session.monthly_counter_ttl(),
            stats: LimiterStatistics::default(),
        }
    }

    /// Compare today's admissions against `limit` (`None` is unlimited)
    pub async fn check_daily(
        &self,
        token: &TokenId,
        limit: Option<u64>,
        window: &BillingWindow,
    ) -> AdmissionCheck {
        let key = keys::token_daily(token, &window.day);
        self.check(token, &key, limit, "daily").await
    }

    /// Compare this month's admissions against `limit` (`None` is unlimited)
    pub async fn check_monthly(
        &self,
        token: &TokenId,
        limit: Option<u64>,
        window: &BillingWindow,
    ) -> AdmissionCheck {
        let key = keys::token_monthly(token, &window.month);
        self.check(token, &key, limit, "monthly").await
    }

    async fn check(
        &self,
        token: &TokenId,
        key: &str,
        limit: Option<u64>,
        period: &'static str,
    ) -> AdmissionCheck {
        if limit.is_none() {
            return AdmissionCheck::unlimited(0);
        }

        let count = match self.cache.get(key).await {
            Ok(raw) => parse_count(key, raw),
            Err(e) => Err(e),
        };

        match count {
            Ok(current) => {
                let check = AdmissionCheck::evaluate(current, limit);
                if !check.allowed {
                    self.stats.denials.fetch_add(1, Ordering::Relaxed);
                    debug!(token = %token.short(), period, current, ?limit, "Token limit reached");
                }
                check
            }
            Err(e) => {
                self.stats.fail_open.fetch_add(1, Ordering::Relaxed);
                warn!(
                    token = %token.short(),
                    period,
                    error = %e,
                    "Token limit check failed, admitting"
                );
                AdmissionCheck {
                    allowed: true,
                    current_count: 0,
                    limit,
                }
            }
        }
    }

    /// Count one admission against today's window
    pub async fn record_daily_access(
        &self,
        token: &TokenId,
        window: &BillingWindow,
    ) -> Result<u64> {
        let key = keys::token_daily(token, &window.day);
        self.record(&key, self.daily_ttl).await
    }

    /// Count one admission against this month's window
    pub async fn record_monthly_access(
        &self,
        token: &TokenId,
        window: &BillingWindow,
    ) -> Result<u64> {
        let key = keys::token_monthly(token, &window.month);
        self.record(&key, self.monthly_ttl).await
    }

    async fn record(&self, key: &str, ttl: Duration) -> Result<u64> {
        let count = self.cache.incr_by(key, 1).await?;
        if count == 1 {
            self.cache.expire(key, ttl).await?;
        }
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Today's usage of a token for display
    pub async fn daily_access_stats(
        &self,
        token: &TokenId,
        limit: Option<u64>,
        window: &BillingWindow,
    ) -> Result<DailyAccessStats> {
        let key = keys::token_daily(token, &window.day);
        let current = parse_count(&key, self.cache.get(&key).await?)?;
        Ok(DailyAccessStats {
            limit,
            current,
            remaining: limit.map(|cap| cap.saturating_sub(current)),
        })
    }

    /// Drop the token's counters for the active windows.
    ///
    /// Used after an owner edits a limit. The counters restart from zero
    /// rather than being reconciled.
    pub async fn invalidate(&self, token: &TokenId, window: &BillingWindow) -> Result<u64> {
        let removed = self
            .cache
            .delete(&[
                keys::token_daily(token, &window.day),
                keys::token_monthly(token, &window.month),
            ])
            .await?;
        info!(token = %token.short(), removed, "Token counters invalidated");
        Ok(removed)
    }

    /// Limiter activity counters
    pub fn statistics(&self) -> &LimiterStatistics {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::TallyError;
    use tally_effects::{MemoryCacheHandler, SimulatedTimeHandler};

    const NOON: u64 = 1_792_411_200_000;

    fn limiter() -> (TokenLimiter, Arc<MemoryCacheHandler>, Arc<SimulatedTimeHandler>) {
        let clock = Arc::new(SimulatedTimeHandler::new(NOON));
        let cache = Arc::new(MemoryCacheHandler::new(clock.clone()));
        (
            TokenLimiter::new(cache.clone(), &SessionConfig::default()),
            cache,
            clock,
        )
    }

    #[tokio::test]
    async fn check_does_not_increment() {
        let (limiter, _, _) = limiter();
        let token = TokenId::new("t1");
        let window = BillingWindow::at(NOON);

        for _ in 0..5 {
            let check = limiter.check_daily(&token, Some(1), &window).await;
            assert!(check.allowed);
            assert_eq!(check.current_count, 0);
        }
    }

    #[tokio::test]
    async fn recorded_admissions_reach_the_cap() {
        let (limiter, _, _) = limiter();
        let token = TokenId::new("t1");
        let window = BillingWindow::at(NOON);

        for expected in 1..=3 {
            assert!(limiter.check_daily(&token, Some(3), &window).await.allowed);
            assert_eq!(limiter.record_daily_access(&token, &window).await.unwrap(), expected);
        }

        let check = limiter.check_daily(&token, Some(3), &window).await;
        assert!(!check.allowed);
        assert_eq!(check.current_count, 3);
        assert_eq!(check.limit, Some(3));
    }

    #[tokio::test]
    async fn daily_counter_rolls_over_with_the_day() {
        let (limiter, _, clock) = limiter();
        let token = TokenId::new("t1");

        let today = BillingWindow::at(clock.get_time());
        limiter.record_daily_access(&token, &today).await.unwrap();
        assert!(!limiter.check_daily(&token, Some(1), &today).await.allowed);

        clock.advance_time(24 * 60 * 60 * 1000);
        let tomorrow = BillingWindow::at(clock.get_time());
        assert!(limiter.check_daily(&token, Some(1), &tomorrow).await.allowed);
    }

    #[tokio::test]
    async fn first_record_sets_expiry() {
        let (limiter, cache, _) = limiter();
        let token = TokenId::new("t1");
        let window = BillingWindow::at(NOON);

        limiter.record_daily_access(&token, &window).await.unwrap();
        let key = keys::token_daily(&token, &window.day);
        assert_eq!(cache.ttl_ms(&key).await, Some(2 * 24 * 60 * 60 * 1000));
    }

    #[tokio::test]
    async fn unlimited_skips_the_cache() {
        let (limiter, cache, _) = limiter();
        cache.set_offline(true);

        let check = limiter
            .check_monthly(&TokenId::new("t1"), None, &BillingWindow::at(NOON))
            .await;
        assert!(check.allowed);
        assert_eq!(limiter.statistics().fail_open.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unreachable_cache_admits() {
        let (limiter, cache, _) = limiter();
        cache.set_offline(true);

        let check = limiter
            .check_daily(&TokenId::new("t1"), Some(1), &BillingWindow::at(NOON))
            .await;
        assert!(check.allowed);
        assert_eq!(limiter.statistics().fail_open.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn record_failure_is_reported() {
        let (limiter, cache, _) = limiter();
        cache.set_offline(true);

        let result = limiter
            .record_daily_access(&TokenId::new("t1"), &BillingWindow::at(NOON))
            .await;
        assert!(matches!(result, Err(TallyError::CacheUnavailable { .. })));
    }

    #[tokio::test]
    async fn invalidation_resets_both_windows() {
        let (limiter, _, _) = limiter();
        let token = TokenId::new("t1");
        let window = BillingWindow::at(NOON);

        limiter.record_daily_access(&token, &window).await.unwrap();
        limiter.record_monthly_access(&token, &window).await.unwrap();
        assert_eq!(limiter.invalidate(&token, &window).await.unwrap(), 2);

        let stats = limiter.daily_access_stats(&token, Some(10), &window).await.unwrap();
        assert_eq!(stats.current, 0);
        assert_eq!(stats.remaining, Some(10));
    }
}

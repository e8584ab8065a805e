//! Budget ledger
//!
//! Tracks each owner's monthly consumption in the cache and decides whether
//! a new session fits the tier's allowance.
//!
//! - Free tier: a plain ceiling on AI + non-AI sessions, no currency and no
//!   overage path.
//! - Premium tier: sessions are priced by the content's AI flag and charged
//!   against the monthly budget plus any overage top-up. When the budget is
//!   exhausted a fixed batch of purchased credits extends it.
//!
//! Checks are read-only; `record_session` moves the counters. As with token
//! limits, concurrent checks may both pass and overshoot the budget by the
//! in-flight sessions. The consumption increment itself fails closed: a
//! cache fault surfaces as a retryable error instead of admitting unbilled
//! usage.
//!
//! The durable store is consulted only for the cold-start tier and content
//! lookups, for credits once the budget is exhausted, and for tier changes.

use crate::cache_guard::parse_count;
use std::sync::Arc;
use std::time::Duration;
use tally_core::config::{Pricing, SessionConfig};
use tally_core::effects::{CacheEffects, LedgerEffects};
use tally_core::{
    keys, BillingWindow, ContentId, DecisionReason, MicroUsd, OwnerId, Result, SessionCheck,
    SessionRecord, TallyError, Tier, TierChangePolicy, UsageStats, VisitorFingerprint,
};
use tracing::{debug, error, info, warn};

/// Owner budget tracking and session pricing
pub struct BudgetLedger {
    cache: Arc<dyn CacheEffects>,
    store: Arc<dyn LedgerEffects>,
    pricing: Pricing,
    session: SessionConfig,
}

impl BudgetLedger {
    /// Create a ledger over the counter cache and the durable store
    pub fn new(
        cache: Arc<dyn CacheEffects>,
        store: Arc<dyn LedgerEffects>,
        pricing: Pricing,
        session: SessionConfig,
    ) -> Self {
        Self {
            cache,
            store,
            pricing,
            session,
        }
    }

    /// Prices in effect
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// Owner tier, from cache or, on a miss, from the durable store.
    ///
    /// A store failure on a miss is a hard error: without a tier no decision
    /// can be made.
    pub async fn resolve_tier(&self, owner: &OwnerId) -> Result<Tier> {
        let key = keys::owner_tier(owner);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<Tier>() {
                Ok(tier) => return Ok(tier),
                Err(_) => warn!(owner = %owner.short(), value = %raw, "Unreadable cached tier"),
            },
            Ok(None) => {}
            Err(e) => warn!(owner = %owner.short(), error = %e, "Tier cache read failed"),
        }

        let record = self.store.fetch_subscription(owner).await.map_err(|e| {
            error!(owner = %owner.short(), error = %e, "Tier lookup failed");
            TallyError::from(e)
        })?;
        debug!(owner = %owner.short(), tier = %record.tier, "Tier loaded from store");

        if let Err(e) = self
            .cache
            .set(&key, record.tier.as_str(), Some(self.session.tier_cache_ttl()))
            .await
        {
            warn!(owner = %owner.short(), error = %e, "Failed to cache tier");
        }
        Ok(record.tier)
    }

    /// Whether sessions on `content` include the AI assistant.
    ///
    /// Unknown content is treated as not AI-enabled.
    pub async fn content_ai_enabled(&self, content: &ContentId) -> Result<bool> {
        let key = keys::content_ai_enabled(content);
        match self.cache.get(&key).await {
            Ok(Some(raw)) if raw == "true" || raw == "false" => return Ok(raw == "true"),
            Ok(Some(raw)) => warn!(
                content = %content.short(),
                value = %raw,
                "Unreadable cached AI flag"
            ),
            Ok(None) => {}
            Err(e) => warn!(content = %content.short(), error = %e, "AI flag cache read failed"),
        }

        let ai_enabled = self
            .store
            .fetch_content_profile(content)
            .await?
            .map(|profile| profile.ai_enabled)
            .unwrap_or(false);

        let value = if ai_enabled { "true" } else { "false" };
        if let Err(e) = self
            .cache
            .set(&key, value, Some(self.session.content_profile_ttl()))
            .await
        {
            warn!(content = %content.short(), error = %e, "Failed to cache AI flag");
        }
        Ok(ai_enabled)
    }

    /// Decide whether a new session may be billed to `owner`
    pub async fn check_session_allowed(
        &self,
        owner: &OwnerId,
        content: &ContentId,
        fingerprint: &VisitorFingerprint,
        is_owner_preview: bool,
        window: &BillingWindow,
    ) -> Result<SessionCheck> {
        if is_owner_preview {
            debug!(owner = %owner.short(), content = %content.short(), "Owner preview, not billed");
            return Ok(SessionCheck::owner_preview());
        }

        let tier = self.resolve_tier(owner).await?;
        let ai_enabled = self.content_ai_enabled(content).await?;
        let session_cost = self.pricing.session_cost(tier, ai_enabled);

        let check = match tier {
            Tier::Free => {
                let ai_sessions = self
                    .read_or_zero(&keys::owner_ai_sessions(owner, &window.month))
                    .await;
                let non_ai_sessions = self
                    .read_or_zero(&keys::owner_non_ai_sessions(owner, &window.month))
                    .await;
                let used = ai_sessions + non_ai_sessions;
                let allowed = used < self.pricing.free_session_limit;
                SessionCheck {
                    allowed,
                    session_cost,
                    tier,
                    ai_enabled,
                    needs_overage: false,
                    budget_remaining: MicroUsd::ZERO,
                    reason: if allowed {
                        DecisionReason::FreeTierWithinLimit
                    } else {
                        DecisionReason::FreeTierLimitReached
                    },
                }
            }
            Tier::Premium => {
                let consumed = MicroUsd::new(
                    self.read_or_zero(&keys::owner_consumed(owner, &window.month))
                        .await,
                );
                let top_up = MicroUsd::new(
                    self.read_or_zero(&keys::owner_topup(owner, &window.month))
                        .await,
                );
                let budget = self.pricing.monthly_budget(tier) + top_up;
                let budget_remaining = budget - consumed;

                if consumed + session_cost <= budget {
                    SessionCheck {
                        allowed: true,
                        session_cost,
                        tier,
                        ai_enabled,
                        needs_overage: false,
                        budget_remaining,
                        reason: DecisionReason::WithinBudget,
                    }
                } else {
                    let balance = self.store.credit_balance(owner).await?;
                    let covered = balance >= self.pricing.credits_per_batch;
                    SessionCheck {
                        allowed: covered,
                        session_cost,
                        tier,
                        ai_enabled,
                        needs_overage: covered,
                        budget_remaining,
                        reason: if covered {
                            DecisionReason::OverageRequired
                        } else {
                            DecisionReason::CreditsInsufficient
                        },
                    }
                }
            }
        };

        debug!(
            owner = %owner.short(),
            visitor = %fingerprint.short(),
            tier = %check.tier,
            cost = %check.session_cost,
            allowed = check.allowed,
            needs_overage = check.needs_overage,
            "Session checked"
        );
        Ok(check)
    }

    /// Charge an admitted session.
    ///
    /// Consumes one credit batch first when the check asked for overage. The
    /// consumption increment fails closed. A batch whose top-up never reached
    /// the cache is refunded. Once the top-up is applied the batch stays spent
    /// and a retry is charged against the extended budget.
    pub async fn record_session(
        &self,
        owner: &OwnerId,
        check: &SessionCheck,
        window: &BillingWindow,
    ) -> Result<SessionRecord> {
        if check.is_owner_preview() || !check.allowed {
            return Ok(SessionRecord::skipped(check.reason));
        }

        let counter_key = if check.ai_enabled {
            keys::owner_ai_sessions(owner, &window.month)
        } else {
            keys::owner_non_ai_sessions(owner, &window.month)
        };

        if check.tier == Tier::Free {
            self.increment_fail_closed(owner, &counter_key, 1).await?;
            debug!(owner = %owner.short(), "Free session recorded");
            return Ok(SessionRecord {
                recorded: true,
                credits_charged: 0,
                session_cost: MicroUsd::ZERO,
                reason: DecisionReason::Recorded,
            });
        }

        let mut credits_charged = 0;
        if check.needs_overage {
            let batch = self.pricing.credits_per_batch;
            let top_up = to_delta(self.pricing.batch_value())?;
            let deduction = self
                .store
                .deduct_overage_credits(owner, batch)
                .await
                .map_err(|e| {
                    error!(owner = %owner.short(), error = %e, "Overage deduction failed");
                    TallyError::from(e)
                })?;
            if !deduction.success {
                info!(
                    owner = %owner.short(),
                    balance = deduction.balance,
                    "Credits insufficient for overage batch"
                );
                return Ok(SessionRecord::skipped(DecisionReason::CreditsInsufficient));
            }
            let top_up_key = keys::owner_topup(owner, &window.month);
            if let Err(e) = self.increment_fail_closed(owner, &top_up_key, top_up).await {
                self.refund_batch(owner, batch, window).await;
                return Err(e);
            }
            credits_charged = batch;
            info!(
                owner = %owner.short(),
                credits = batch,
                balance = deduction.balance,
                added = %self.pricing.batch_value(),
                "Overage batch applied"
            );
        }

        let cost = to_delta(check.session_cost)?;
        self.increment_fail_closed(owner, &keys::owner_consumed(owner, &window.month), cost)
            .await?;

        if let Err(e) = self.increment(&counter_key, 1).await {
            warn!(owner = %owner.short(), error = %e, "Failed to count premium session");
        }

        debug!(owner = %owner.short(), cost = %check.session_cost, "Premium session recorded");
        Ok(SessionRecord {
            recorded: true,
            credits_charged,
            session_cost: check.session_cost,
            reason: if credits_charged > 0 {
                DecisionReason::RecordedWithOverage
            } else {
                DecisionReason::Recorded
            },
        })
    }

    /// Usage for the active month
    pub async fn usage_stats(&self, owner: &OwnerId, window: &BillingWindow) -> Result<UsageStats> {
        let tier = self.resolve_tier(owner).await?;
        let consumed = MicroUsd::new(self.read(&keys::owner_consumed(owner, &window.month)).await?);
        let top_up = MicroUsd::new(self.read(&keys::owner_topup(owner, &window.month)).await?);
        let ai_sessions = self.read(&keys::owner_ai_sessions(owner, &window.month)).await?;
        let non_ai_sessions = self
            .read(&keys::owner_non_ai_sessions(owner, &window.month))
            .await?;
        let monthly_budget = self.pricing.monthly_budget(tier);

        Ok(UsageStats {
            tier,
            monthly_budget,
            top_up,
            consumed,
            remaining: (monthly_budget + top_up) - consumed,
            ai_sessions,
            non_ai_sessions,
            session_limit: match tier {
                Tier::Free => Some(self.pricing.free_session_limit),
                Tier::Premium => None,
            },
        })
    }

    /// Move an owner to a new tier.
    ///
    /// The durable store is updated first. The cached tier and the
    /// consumption state chosen by `policy` are then written in one atomic
    /// multi-set, so no reader observes the new tier with the old period's
    /// counters or the reverse.
    pub async fn apply_tier_change(
        &self,
        owner: &OwnerId,
        tier: Tier,
        policy: TierChangePolicy,
        window: &BillingWindow,
    ) -> Result<()> {
        self.store
            .update_subscription_tier(owner, tier)
            .await
            .map_err(|e| {
                error!(owner = %owner.short(), error = %e, "Tier update rejected by store");
                TallyError::from(e)
            })?;
        self.write_tier_state(owner, tier, policy, window).await?;
        info!(owner = %owner.short(), %tier, ?policy, "Tier change applied");
        Ok(())
    }

    /// Start a fresh period for `owner` under its current tier
    pub async fn reset_usage(&self, owner: &OwnerId, window: &BillingWindow) -> Result<()> {
        let tier = self.resolve_tier(owner).await?;
        self.write_tier_state(owner, tier, TierChangePolicy::Reset, window)
            .await?;
        info!(owner = %owner.short(), %tier, "Usage reset");
        Ok(())
    }

    /// Drop the cached tier so the next decision reloads it. Consumption is untouched.
    pub async fn invalidate_owner(&self, owner: &OwnerId) -> Result<()> {
        self.cache.delete(&[keys::owner_tier(owner)]).await?;
        debug!(owner = %owner.short(), "Cached tier invalidated");
        Ok(())
    }

    /// Drop the cached AI flag of `content`
    pub async fn invalidate_content_profile(&self, content: &ContentId) -> Result<()> {
        self.cache.delete(&[keys::content_ai_enabled(content)]).await?;
        debug!(content = %content.short(), "Cached AI flag invalidated");
        Ok(())
    }

    /// Record a credit purchase in the durable store and return the new balance
    pub async fn purchase_credits(&self, owner: &OwnerId, credits: u64) -> Result<u64> {
        let balance = self.store.purchase_credits(owner, credits).await?;
        info!(owner = %owner.short(), credits, balance, "Credits purchased");
        Ok(balance)
    }

    /// Current overage-credit balance
    pub async fn credit_balance(&self, owner: &OwnerId) -> Result<u64> {
        Ok(self.store.credit_balance(owner).await?)
    }

    async fn write_tier_state(
        &self,
        owner: &OwnerId,
        tier: Tier,
        policy: TierChangePolicy,
        window: &BillingWindow,
    ) -> Result<()> {
        let mut entries = vec![(keys::owner_tier(owner), tier.as_str().to_string())];
        if policy == TierChangePolicy::Reset {
            for key in [
                keys::owner_consumed(owner, &window.month),
                keys::owner_topup(owner, &window.month),
                keys::owner_ai_sessions(owner, &window.month),
                keys::owner_non_ai_sessions(owner, &window.month),
            ] {
                entries.push((key, "0".to_string()));
            }
        }

        let ttl = tier_state_ttl(&self.session);
        if let Err(e) = self.cache.set_many(&entries, Some(ttl)).await {
            error!(owner = %owner.short(), error = %e, "Failed to write tier state");
            if let Err(e) = self.cache.delete(&[keys::owner_tier(owner)]).await {
                warn!(owner = %owner.short(), error = %e, "Failed to drop stale cached tier");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<u64> {
        Ok(parse_count(key, self.cache.get(key).await?)?)
    }

    async fn read_or_zero(&self, key: &str) -> u64 {
        match self.read(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Usage read failed, treating as zero");
                0
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self.cache.incr_by(key, delta).await?;
        if value == delta {
            self.cache
                .expire(key, self.session.monthly_counter_ttl())
                .await?;
        }
        Ok(value)
    }

    async fn increment_fail_closed(&self, owner: &OwnerId, key: &str, delta: i64) -> Result<i64> {
        self.increment(key, delta).await.map_err(|e| {
            error!(
                owner = %owner.short(),
                key,
                error = %e,
                "Budget increment failed, rejecting session"
            );
            match e {
                TallyError::CacheUnavailable { .. } => e,
                other => TallyError::cache_unavailable(other.to_string()),
            }
        })
    }

    async fn refund_batch(&self, owner: &OwnerId, credits: u64, window: &BillingWindow) {
        match self.store.refund_overage_credits(owner, credits).await {
            Ok(balance) => {
                warn!(
                    owner = %owner.short(),
                    credits,
                    balance,
                    "Overage batch refunded, top-up not applied"
                );
            }
            Err(e) => error!(
                owner = %owner,
                month = %window.month,
                credits,
                error = %e,
                "Overage refund failed, credits deducted without budget extension"
            ),
        }
    }
}

fn to_delta(amount: MicroUsd) -> Result<i64> {
    i64::try_from(amount.micros())
        .map_err(|_| TallyError::invalid(format!("amount {amount} exceeds counter range")))
}

/// Expiry used for counters written by tier changes
pub fn tier_state_ttl(session: &SessionConfig) -> Duration {
    session.tier_cache_ttl().max(session.monthly_counter_ttl())
}

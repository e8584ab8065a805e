//! Content gate
//!
//! Runs one metering decision per content request:
//!
//! 1. resolve the distribution token (unknown or disabled tokens fail here)
//! 2. resolve the visitor fingerprint
//! 3. claim the dedup key; a repeat skips billing entirely
//! 4. check the token's daily then monthly cap
//! 5. check and record the owner's budget
//! 6. count the admission against the token (detached)
//! 7. log the decision (detached)
//!
//! Denials come back as flags on a successful envelope. A denied claim is
//! marked so repeats inside the window see the same denial instead of free
//! content. A claim whose billing failed is released, so the retry is billed.

use super::content::ContentSource;
use super::envelope::{ContentEnvelope, Denial, EnvelopeData};
use crate::access_log::AccessLogger;
use crate::cache_guard::CacheGuard;
use crate::dedup::{DedupClaim, DedupGate};
use crate::identity::{IdentityResolver, RequestSignals};
use crate::ledger::BudgetLedger;
use crate::limiter::TokenLimiter;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{
    CacheEffects, DistributionToken, LedgerEffects, PhysicalTimeEffects, TaskSpawner,
};
use tally_core::{
    keys, AccessLogEntry, BillingWindow, DailyAccessStats, DecisionReason, MeteringConfig,
    MicroUsd, OwnerId, Result, TallyError, Tier, TierChangePolicy, TokenId, UsageStats,
    VisitorFingerprint,
};
use tracing::{debug, info, warn};

/// Collaborators the gate runs against
#[derive(Clone)]
pub struct GateDependencies {
    /// Counter cache
    pub cache: Arc<dyn CacheEffects>,
    /// Durable store
    pub store: Arc<dyn LedgerEffects>,
    /// Clock used for billing windows
    pub clock: Arc<dyn PhysicalTimeEffects>,
    /// Runner for detached work
    pub spawner: Arc<dyn TaskSpawner>,
    /// Payload renderer
    pub content: Arc<dyn ContentSource>,
}

/// One inbound content request
#[derive(Debug, Clone)]
pub struct ContentRequest {
    /// Distribution token the visitor arrived through
    pub token: TokenId,
    /// Requested rendering language
    pub language: String,
    /// Visitor signals forwarded by the routing layer
    pub signals: RequestSignals,
    /// The content owner is viewing their own content
    pub is_owner_preview: bool,
}

impl ContentRequest {
    /// Request for `token` in `language` with the given visitor signals
    pub fn new(token: TokenId, language: impl Into<String>, signals: RequestSignals) -> Self {
        Self {
            token,
            language: language.into(),
            signals,
            is_owner_preview: false,
        }
    }

    /// Mark the request as an owner preview
    pub fn owner_preview(mut self) -> Self {
        self.is_owner_preview = true;
        self
    }
}

/// Metering pipeline for content requests
pub struct ContentGate {
    identity: IdentityResolver,
    dedup: DedupGate,
    limiter: Arc<TokenLimiter>,
    ledger: BudgetLedger,
    access_log: Arc<AccessLogger>,
    cache: Arc<dyn CacheEffects>,
    store: Arc<dyn LedgerEffects>,
    clock: Arc<dyn PhysicalTimeEffects>,
    spawner: Arc<dyn TaskSpawner>,
    content: Arc<dyn ContentSource>,
    render_ttl: Duration,
}

impl ContentGate {
    /// Build the pipeline. Every cache call is bounded by the configured timeout.
    pub fn new(config: &MeteringConfig, deps: GateDependencies) -> Self {
        let cache: Arc<dyn CacheEffects> = Arc::new(CacheGuard::new(
            deps.cache,
            config.cache.operation_timeout(),
        ));
        Self {
            identity: IdentityResolver::new(),
            dedup: DedupGate::new(cache.clone(), config.session.dedup_window()),
            limiter: Arc::new(TokenLimiter::new(cache.clone(), &config.session)),
            ledger: BudgetLedger::new(
                cache.clone(),
                deps.store.clone(),
                config.pricing(),
                config.session.clone(),
            ),
            access_log: Arc::new(AccessLogger::new(
                cache.clone(),
                deps.store.clone(),
                deps.spawner.clone(),
                config.access_log.clone(),
            )),
            cache,
            store: deps.store,
            clock: deps.clock,
            spawner: deps.spawner,
            content: deps.content,
            render_ttl: config.content.render_ttl(),
        }
    }

    /// Serve a content request and report its metering outcome
    pub async fn serve(&self, request: &ContentRequest) -> Result<ContentEnvelope> {
        let now = self.clock.current_timestamp_ms().await?;
        let window = BillingWindow::at(now);
        let token = self.resolve_token(&request.token).await?;
        let fingerprint = self.identity.resolve(&request.signals);

        if request.is_owner_preview {
            debug!(token = %token.token.short(), "Owner preview");
            let (content, cached) = self.render(&token, &request.language).await?;
            return Ok(ContentEnvelope {
                success: true,
                data: EnvelopeData {
                    content: Some(content),
                    allowed: true,
                    ..EnvelopeData::default()
                },
                cached,
                deduplicated: false,
            });
        }

        let claim = self.dedup.claim(&token.content, &fingerprint).await;
        if !claim.is_new_session {
            return self.serve_repeat(&token, &fingerprint, &request.language).await;
        }

        let daily = self
            .limiter
            .check_daily(&token.token, token.daily_limit, &window)
            .await;
        if !daily.allowed {
            return Ok(self.deny(&token, &fingerprint, Denial::Daily, None, now).await);
        }
        let monthly = self
            .limiter
            .check_monthly(&token.token, token.monthly_limit, &window)
            .await;
        if !monthly.allowed {
            return Ok(self.deny(&token, &fingerprint, Denial::Monthly, None, now).await);
        }

        let check = match self
            .ledger
            .check_session_allowed(&token.owner, &token.content, &fingerprint, false, &window)
            .await
        {
            Ok(check) => check,
            Err(e) => return Err(self.unbilled(&token, &fingerprint, claim, e).await),
        };
        if !check.allowed {
            let denial = budget_denial(check.reason);
            return Ok(self
                .deny(&token, &fingerprint, denial, Some((check.tier, check.ai_enabled)), now)
                .await);
        }

        let record = match self.ledger.record_session(&token.owner, &check, &window).await {
            Ok(record) => record,
            Err(e) => return Err(self.unbilled(&token, &fingerprint, claim, e).await),
        };
        if !record.recorded {
            let denial = budget_denial(record.reason);
            return Ok(self
                .deny(&token, &fingerprint, denial, Some((check.tier, check.ai_enabled)), now)
                .await);
        }

        self.record_token_access(&token.token, window);
        self.access_log.log_access(AccessLogEntry {
            content_id: token.content.clone(),
            fingerprint: fingerprint.clone(),
            owner_tier: check.tier,
            is_overage: record.credits_charged > 0,
            session_cost: record.session_cost,
            is_ai_enabled: check.ai_enabled,
            timestamp_ms: now,
        });

        let (content, cached) = self.render(&token, &request.language).await?;
        debug!(
            token = %token.token.short(),
            visitor = %fingerprint.short(),
            cost = %record.session_cost,
            overage = check.needs_overage,
            "Session admitted"
        );
        Ok(ContentEnvelope {
            success: true,
            data: EnvelopeData {
                content: Some(content),
                allowed: true,
                session_cost: record.session_cost,
                is_new_session: true,
                needs_overage: check.needs_overage,
                ..EnvelopeData::default()
            },
            cached,
            deduplicated: false,
        })
    }

    async fn serve_repeat(
        &self,
        token: &DistributionToken,
        fingerprint: &VisitorFingerprint,
        language: &str,
    ) -> Result<ContentEnvelope> {
        let mut data = EnvelopeData {
            allowed: true,
            ..EnvelopeData::default()
        };

        let denial = self
            .dedup
            .recorded_denial(&token.content, fingerprint)
            .await
            .and_then(|raw| Denial::parse(&raw));
        if let Some(denial) = denial {
            denial.apply(&mut data);
            return Ok(ContentEnvelope {
                success: true,
                data,
                cached: false,
                deduplicated: true,
            });
        }

        let (content, cached) = self.render(token, language).await?;
        data.content = Some(content);
        Ok(ContentEnvelope {
            success: true,
            data,
            cached,
            deduplicated: true,
        })
    }

    /// Give back a won claim when billing failed, so the retry is charged
    /// instead of served as a repeat.
    async fn unbilled(
        &self,
        token: &DistributionToken,
        fingerprint: &VisitorFingerprint,
        claim: DedupClaim,
        err: TallyError,
    ) -> TallyError {
        warn!(
            token = %token.token.short(),
            visitor = %fingerprint.short(),
            error = %err,
            retryable = err.is_retryable(),
            "Session not billed"
        );
        if !claim.degraded {
            self.dedup.release(&token.content, fingerprint).await;
        }
        err
    }

    async fn deny(
        &self,
        token: &DistributionToken,
        fingerprint: &VisitorFingerprint,
        denial: Denial,
        decided: Option<(Tier, bool)>,
        now: u64,
    ) -> ContentEnvelope {
        info!(
            token = %token.token.short(),
            visitor = %fingerprint.short(),
            denial = denial.as_str(),
            "Session denied"
        );
        self.dedup
            .mark_denied(&token.content, fingerprint, denial.as_str())
            .await;

        let decided = match decided {
            Some(decided) => Some(decided),
            None => self.describe_owner(token).await,
        };
        if let Some((owner_tier, is_ai_enabled)) = decided {
            self.access_log.log_access(AccessLogEntry {
                content_id: token.content.clone(),
                fingerprint: fingerprint.clone(),
                owner_tier,
                is_overage: false,
                session_cost: MicroUsd::ZERO,
                is_ai_enabled,
                timestamp_ms: now,
            });
        }

        let mut data = EnvelopeData::default();
        denial.apply(&mut data);
        ContentEnvelope {
            success: true,
            data,
            cached: false,
            deduplicated: false,
        }
    }

    /// Tier and AI flag for logging a limiter denial. Best effort.
    async fn describe_owner(&self, token: &DistributionToken) -> Option<(Tier, bool)> {
        let tier = self.ledger.resolve_tier(&token.owner).await;
        let ai_enabled = self.ledger.content_ai_enabled(&token.content).await;
        match (tier, ai_enabled) {
            (Ok(tier), Ok(ai_enabled)) => Some((tier, ai_enabled)),
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    token = %token.token.short(),
                    error = %e,
                    "Denial not logged, owner lookup failed"
                );
                None
            }
        }
    }

    fn record_token_access(&self, token: &TokenId, window: BillingWindow) {
        let limiter = Arc::clone(&self.limiter);
        let token = token.clone();
        self.spawner.spawn(
            async move {
                if let Err(e) = limiter.record_daily_access(&token, &window).await {
                    warn!(token = %token.short(), error = %e, "Failed to count daily access");
                }
                if let Err(e) = limiter.record_monthly_access(&token, &window).await {
                    warn!(token = %token.short(), error = %e, "Failed to count monthly access");
                }
            }
            .boxed(),
        );
    }

    async fn resolve_token(&self, id: &TokenId) -> Result<DistributionToken> {
        let token = self.fetch_token(id).await?;
        if !token.enabled {
            debug!(token = %id.short(), "Channel disabled");
            return Err(TallyError::channel_disabled(format!(
                "distribution token {id} is disabled"
            )));
        }
        Ok(token)
    }

    async fn fetch_token(&self, id: &TokenId) -> Result<DistributionToken> {
        self.store
            .fetch_distribution_token(id)
            .await
            .map_err(|e| {
                warn!(token = %id.short(), error = %e, "Token lookup failed");
                TallyError::from(e)
            })?
            .ok_or_else(|| TallyError::invalid_token(format!("unknown distribution token {id}")))
    }

    async fn render(&self, token: &DistributionToken, language: &str) -> Result<(Value, bool)> {
        let key = keys::rendered_content(&token.token, language);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Ok((value, true)),
                Err(e) => warn!(
                    token = %token.token.short(),
                    error = %e,
                    "Discarding unreadable cached content"
                ),
            },
            Ok(None) => {}
            Err(e) => warn!(token = %token.token.short(), error = %e, "Content cache read failed"),
        }

        let value = self.content.render(token, language).await?;
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, &raw, Some(self.render_ttl)).await {
                    warn!(
                        token = %token.token.short(),
                        error = %e,
                        "Failed to cache rendered content"
                    );
                }
            }
            Err(e) => warn!(
                token = %token.token.short(),
                error = %e,
                "Rendered content not cacheable"
            ),
        }
        Ok((value, false))
    }

    /// Clear a token's cached content and its active-window counters.
    ///
    /// Works for disabled tokens too. Returns the number of keys removed.
    pub async fn invalidate_cache(&self, id: &TokenId) -> Result<u64> {
        let token = self.fetch_token(id).await?;
        let window = self.window().await?;
        let content = self
            .cache
            .delete_prefix(&keys::rendered_content_prefix(&token.token))
            .await?;
        let counters = self.limiter.invalidate(&token.token, &window).await?;
        info!(token = %id.short(), content, counters, "Token cache invalidated");
        Ok(content + counters)
    }

    /// Move an owner to `tier`, resetting or carrying the month's usage by transition
    pub async fn change_tier(&self, owner: &OwnerId, tier: Tier) -> Result<TierChangePolicy> {
        let window = self.window().await?;
        let current = self.ledger.resolve_tier(owner).await?;
        let policy = TierChangePolicy::for_transition(current, tier);
        self.ledger
            .apply_tier_change(owner, tier, policy, &window)
            .await?;
        Ok(policy)
    }

    /// Usage of `owner` for the current month
    pub async fn usage_stats(&self, owner: &OwnerId) -> Result<UsageStats> {
        let window = self.window().await?;
        self.ledger.usage_stats(owner, &window).await
    }

    /// Today's admissions through `token`
    pub async fn daily_access_stats(&self, id: &TokenId) -> Result<DailyAccessStats> {
        let token = self.fetch_token(id).await?;
        let window = self.window().await?;
        self.limiter
            .daily_access_stats(&token.token, token.daily_limit, &window)
            .await
    }

    /// Drain buffered access logs into the durable store now
    pub async fn flush_access_log_buffer(&self) -> Result<usize> {
        self.access_log.flush().await
    }

    /// Start the periodic access log flush on the task spawner
    pub fn start_periodic_flush(&self) {
        self.spawner
            .spawn(Arc::clone(&self.access_log).periodic_flush(self.clock.clone()));
    }

    async fn window(&self) -> Result<BillingWindow> {
        Ok(BillingWindow::at(self.clock.current_timestamp_ms().await?))
    }

    /// Budget ledger
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Token limiter
    pub fn limiter(&self) -> &TokenLimiter {
        &self.limiter
    }

    /// Dedup gate
    pub fn dedup(&self) -> &DedupGate {
        &self.dedup
    }

    /// Access logger
    pub fn access_log(&self) -> &Arc<AccessLogger> {
        &self.access_log
    }
}

fn budget_denial(reason: DecisionReason) -> Denial {
    match reason {
        DecisionReason::CreditsInsufficient => Denial::Credits,
        _ => Denial::Budget,
    }
}

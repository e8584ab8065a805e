//! In-memory durable ledger handler
//!
//! Stands in for the relational store and its stored procedures. Each
//! operation runs under one write lock, which gives credit deduction the
//! same all-or-nothing behavior as the real transaction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tally_core::effects::{
    ContentProfile, CreditDeduction, DistributionToken, LedgerEffects, LedgerError,
    SubscriptionRecord,
};
use tally_core::{AccessLogEntry, ContentId, OwnerId, Tier, TokenId};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct LedgerState {
    subscriptions: HashMap<OwnerId, Tier>,
    contents: HashMap<ContentId, ContentProfile>,
    tokens: HashMap<TokenId, DistributionToken>,
    credits: HashMap<OwnerId, u64>,
    access_logs: Vec<AccessLogEntry>,
}

/// Per-operation call counts, for asserting hot-path store usage
#[derive(Debug, Default)]
pub struct LedgerCallCounts {
    /// `fetch_subscription` calls
    pub subscription_fetches: AtomicU64,
    /// `fetch_content_profile` calls
    pub content_fetches: AtomicU64,
    /// `deduct_overage_credits` calls
    pub deductions: AtomicU64,
    /// `refund_overage_credits` calls
    pub refunds: AtomicU64,
    /// `append_access_logs` calls
    pub log_appends: AtomicU64,
}

/// In-memory ledger handler for tests and simulation
pub struct MemoryLedgerHandler {
    state: Arc<RwLock<LedgerState>>,
    offline: AtomicBool,
    calls: LedgerCallCounts,
}

impl MemoryLedgerHandler {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            offline: AtomicBool::new(false),
            calls: LedgerCallCounts::default(),
        }
    }

    /// Make every subsequent call fail as if the store were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Call counters
    pub fn calls(&self) -> &LedgerCallCounts {
        &self.calls
    }

    /// Seed a subscription row
    pub async fn insert_subscription(&self, owner: OwnerId, tier: Tier) {
        self.state.write().await.subscriptions.insert(owner, tier);
    }

    /// Seed a content row
    pub async fn insert_content(&self, profile: ContentProfile) {
        self.state
            .write()
            .await
            .contents
            .insert(profile.content.clone(), profile);
    }

    /// Seed a distribution token
    pub async fn insert_token(&self, token: DistributionToken) {
        self.state
            .write()
            .await
            .tokens
            .insert(token.token.clone(), token);
    }

    /// Durable copy of the access log
    pub async fn access_logs(&self) -> Vec<AccessLogEntry> {
        self.state.read().await.access_logs.clone()
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::unavailable("memory ledger is offline"));
        }
        Ok(())
    }
}

impl Default for MemoryLedgerHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerEffects for MemoryLedgerHandler {
    async fn fetch_subscription(&self, owner: &OwnerId) -> Result<SubscriptionRecord, LedgerError> {
        self.calls
            .subscription_fetches
            .fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let state = self.state.read().await;
        Ok(SubscriptionRecord {
            owner: owner.clone(),
            tier: state.subscriptions.get(owner).copied().unwrap_or_default(),
        })
    }

    async fn update_subscription_tier(
        &self,
        owner: &OwnerId,
        tier: Tier,
    ) -> Result<(), LedgerError> {
        self.check_online()?;
        self.state
            .write()
            .await
            .subscriptions
            .insert(owner.clone(), tier);
        Ok(())
    }

    async fn fetch_content_profile(
        &self,
        content: &ContentId,
    ) -> Result<Option<ContentProfile>, LedgerError> {
        self.calls.content_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.state.read().await.contents.get(content).cloned())
    }

    async fn fetch_distribution_token(
        &self,
        token: &TokenId,
    ) -> Result<Option<DistributionToken>, LedgerError> {
        self.check_online()?;
        Ok(self.state.read().await.tokens.get(token).cloned())
    }

    async fn credit_balance(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        self.check_online()?;
        Ok(self
            .state
            .read()
            .await
            .credits
            .get(owner)
            .copied()
            .unwrap_or(0))
    }

    async fn purchase_credits(&self, owner: &OwnerId, credits: u64) -> Result<u64, LedgerError> {
        self.check_online()?;
        if credits == 0 {
            return Err(LedgerError::rejected("credit purchase must be positive"));
        }
        let mut state = self.state.write().await;
        let balance = state.credits.entry(owner.clone()).or_insert(0);
        *balance = balance.saturating_add(credits);
        Ok(*balance)
    }

    async fn deduct_overage_credits(
        &self,
        owner: &OwnerId,
        credits: u64,
    ) -> Result<CreditDeduction, LedgerError> {
        self.calls.deductions.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut state = self.state.write().await;
        let balance = state.credits.entry(owner.clone()).or_insert(0);
        if *balance < credits {
            return Ok(CreditDeduction {
                success: false,
                balance: *balance,
            });
        }
        *balance -= credits;
        Ok(CreditDeduction {
            success: true,
            balance: *balance,
        })
    }

    async fn refund_overage_credits(
        &self,
        owner: &OwnerId,
        credits: u64,
    ) -> Result<u64, LedgerError> {
        self.calls.refunds.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut state = self.state.write().await;
        let balance = state.credits.entry(owner.clone()).or_insert(0);
        *balance = balance.saturating_add(credits);
        Ok(*balance)
    }

    async fn append_access_logs(&self, entries: &[AccessLogEntry]) -> Result<usize, LedgerError> {
        self.calls.log_appends.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.state
            .write()
            .await
            .access_logs
            .extend_from_slice(entries);
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn unknown_owner_is_free_tier() {
        let ledger = MemoryLedgerHandler::new();
        let record = ledger
            .fetch_subscription(&OwnerId::new("nobody"))
            .await
            .unwrap();
        assert_eq!(record.tier, Tier::Free);
    }

    #[tokio::test]
    async fn deduction_is_all_or_nothing() {
        let ledger = MemoryLedgerHandler::new();
        let owner = OwnerId::new("owner-1");
        ledger.purchase_credits(&owner, 7).await.unwrap();

        let first = ledger.deduct_overage_credits(&owner, 5).await.unwrap();
        assert_eq!(first, CreditDeduction { success: true, balance: 2 });

        let second = ledger.deduct_overage_credits(&owner, 5).await.unwrap();
        assert_eq!(second, CreditDeduction { success: false, balance: 2 });
    }

    #[tokio::test]
    async fn refund_restores_deducted_batch() {
        let ledger = MemoryLedgerHandler::new();
        let owner = OwnerId::new("owner-1");
        ledger.purchase_credits(&owner, 5).await.unwrap();
        ledger.deduct_overage_credits(&owner, 5).await.unwrap();

        assert_eq!(ledger.refund_overage_credits(&owner, 5).await.unwrap(), 5);
        assert_eq!(ledger.credit_balance(&owner).await.unwrap(), 5);
        assert_eq!(ledger.calls().refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_ledger_reports_unavailable() {
        let ledger = MemoryLedgerHandler::new();
        ledger.set_offline(true);
        assert_matches!(
            ledger.fetch_subscription(&OwnerId::new("o")).await,
            Err(LedgerError::Unavailable { .. })
        );
        assert_eq!(ledger.calls().subscription_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_purchase_is_rejected() {
        let ledger = MemoryLedgerHandler::new();
        assert_matches!(
            ledger.purchase_credits(&OwnerId::new("o"), 0).await,
            Err(LedgerError::Rejected { .. })
        );
    }
}

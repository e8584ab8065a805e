//! Durable ledger effect trait
//!
//! The durable store owns tier identity, credit-purchase transactions and the
//! access-log archive. The metering engine talks to it only through these
//! named operations; there is no generic query surface and counters are never
//! written back to it.
//!
//! # Effect Classification
//!
//! - **Category**: Application Effect
//! - **Implementation**: `tally-effects` (in-memory); production stores
//!   implement it over their own stored procedures
//! - **Usage**: tier cold start, overage deduction and refund, token
//!   resolution, log flush

use crate::access_log::AccessLogEntry;
use crate::identifiers::{ContentId, OwnerId, TokenId};
use crate::tier::Tier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error type for durable ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum LedgerError {
    /// Store could not be reached
    #[error("Ledger unavailable: {reason}")]
    Unavailable {
        /// Backend-specific reason
        reason: String,
    },
    /// Referenced row does not exist
    #[error("Ledger row not found: {what}")]
    NotFound {
        /// Description of the missing row
        what: String,
    },
    /// Transaction was refused by the store
    #[error("Ledger transaction rejected: {reason}")]
    Rejected {
        /// Store-provided reason
        reason: String,
    },
}

impl LedgerError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a rejected-transaction error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Tier row of an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owner the row belongs to
    pub owner: OwnerId,
    /// Current billing tier
    pub tier: Tier,
}

/// Billing-relevant attributes of a piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentProfile {
    /// Content identifier
    pub content: ContentId,
    /// Owner billed for sessions on this content
    pub owner: OwnerId,
    /// Whether sessions include the AI assistant (priced higher)
    pub ai_enabled: bool,
}

/// A distribution channel pointing at content, with its own admission caps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionToken {
    /// Token identifier
    pub token: TokenId,
    /// Content the token serves
    pub content: ContentId,
    /// Owner of the content
    pub owner: OwnerId,
    /// Whether the owner has the channel switched on
    pub enabled: bool,
    /// New sessions admitted per day; `None` is unlimited
    pub daily_limit: Option<u64>,
    /// New sessions admitted per month; `None` is unlimited
    pub monthly_limit: Option<u64>,
}

/// Outcome of an atomic overage-credit deduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditDeduction {
    /// Whether the full amount was deducted
    pub success: bool,
    /// Balance after the transaction (unchanged when `success` is false)
    pub balance: u64,
}

/// Durable store contract consumed by the metering engine.
#[async_trait]
pub trait LedgerEffects: Send + Sync {
    /// Fetch an owner's tier. Owners without a subscription row are free tier.
    async fn fetch_subscription(&self, owner: &OwnerId) -> Result<SubscriptionRecord, LedgerError>;

    /// Persist a tier change (invoked on behalf of the payment collaborator).
    async fn update_subscription_tier(&self, owner: &OwnerId, tier: Tier)
        -> Result<(), LedgerError>;

    /// Fetch content billing attributes.
    async fn fetch_content_profile(
        &self,
        content: &ContentId,
    ) -> Result<Option<ContentProfile>, LedgerError>;

    /// Resolve a distribution token.
    async fn fetch_distribution_token(
        &self,
        token: &TokenId,
    ) -> Result<Option<DistributionToken>, LedgerError>;

    /// Current overage-credit balance.
    async fn credit_balance(&self, owner: &OwnerId) -> Result<u64, LedgerError>;

    /// Add purchased credits, returning the new balance.
    async fn purchase_credits(&self, owner: &OwnerId, credits: u64) -> Result<u64, LedgerError>;

    /// Atomically deduct `credits` if the balance covers them.
    async fn deduct_overage_credits(
        &self,
        owner: &OwnerId,
        credits: u64,
    ) -> Result<CreditDeduction, LedgerError>;

    /// Return credits taken by a deduction whose budget extension was never
    /// applied, returning the new balance.
    async fn refund_overage_credits(&self, owner: &OwnerId, credits: u64)
        -> Result<u64, LedgerError>;

    /// Append a batch of access log entries, returning how many were stored.
    async fn append_access_logs(&self, entries: &[AccessLogEntry]) -> Result<usize, LedgerError>;
}

/// Blanket implementation for Arc<T> where T: LedgerEffects
#[async_trait]
impl<T: LedgerEffects + ?Sized> LedgerEffects for Arc<T> {
    async fn fetch_subscription(&self, owner: &OwnerId) -> Result<SubscriptionRecord, LedgerError> {
        (**self).fetch_subscription(owner).await
    }

    async fn update_subscription_tier(
        &self,
        owner: &OwnerId,
        tier: Tier,
    ) -> Result<(), LedgerError> {
        (**self).update_subscription_tier(owner, tier).await
    }

    async fn fetch_content_profile(
        &self,
        content: &ContentId,
    ) -> Result<Option<ContentProfile>, LedgerError> {
        (**self).fetch_content_profile(content).await
    }

    async fn fetch_distribution_token(
        &self,
        token: &TokenId,
    ) -> Result<Option<DistributionToken>, LedgerError> {
        (**self).fetch_distribution_token(token).await
    }

    async fn credit_balance(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        (**self).credit_balance(owner).await
    }

    async fn purchase_credits(&self, owner: &OwnerId, credits: u64) -> Result<u64, LedgerError> {
        (**self).purchase_credits(owner, credits).await
    }

    async fn deduct_overage_credits(
        &self,
        owner: &OwnerId,
        credits: u64,
    ) -> Result<CreditDeduction, LedgerError> {
        (**self).deduct_overage_credits(owner, credits).await
    }

    async fn refund_overage_credits(
        &self,
        owner: &OwnerId,
        credits: u64,
    ) -> Result<u64, LedgerError> {
        (**self).refund_overage_credits(owner, credits).await
    }

    async fn append_access_logs(&self, entries: &[AccessLogEntry]) -> Result<usize, LedgerError> {
        (**self).append_access_logs(entries).await
    }
}

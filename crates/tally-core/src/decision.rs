//! Decision objects
//!
//! Quota outcomes are values, not errors. Every check returns one of these
//! and the pipeline folds them into the response envelope's flags.

use crate::money::MicroUsd;
use crate::tier::Tier;
use serde::{Deserialize, Serialize};

/// Why a check or record step reached its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Owner previewing their own content; billing bypassed
    OwnerPreview,
    /// Visitor already claimed this content within the dedup window
    RepeatSession,
    /// Free tier below its monthly session ceiling
    FreeTierWithinLimit,
    /// Premium session fits the remaining budget
    WithinBudget,
    /// Premium budget exhausted; a credit batch will extend it
    OverageRequired,
    /// Free tier reached its monthly session ceiling
    FreeTierLimitReached,
    /// Premium budget exhausted and not enough credits for a batch
    CreditsInsufficient,
    /// Distribution token reached its daily cap
    DailyLimitReached,
    /// Distribution token reached its monthly cap
    MonthlyLimitReached,
    /// Session was charged against the budget
    Recorded,
    /// Session was charged after a credit batch extended the budget
    RecordedWithOverage,
}

impl DecisionReason {
    /// Whether this reason denies the session for lack of budget or credits
    pub fn is_budget_denial(&self) -> bool {
        matches!(
            self,
            Self::FreeTierLimitReached | Self::CreditsInsufficient
        )
    }
}

/// Outcome of the budget check for one prospective session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCheck {
    /// Whether the session may proceed to recording
    pub allowed: bool,
    /// Price of the session (zero on the free tier and for owner preview)
    pub session_cost: MicroUsd,
    /// Tier the decision was made under
    pub tier: Tier,
    /// Whether the content runs the AI assistant
    pub ai_enabled: bool,
    /// Whether recording must first consume a credit batch
    pub needs_overage: bool,
    /// Budget left before this session (zero on the free tier)
    pub budget_remaining: MicroUsd,
    /// Outcome reason
    pub reason: DecisionReason,
}

impl SessionCheck {
    /// Distinguished decision for an owner previewing their own content
    pub fn owner_preview() -> Self {
        Self {
            allowed: true,
            session_cost: MicroUsd::ZERO,
            tier: Tier::Free,
            ai_enabled: false,
            needs_overage: false,
            budget_remaining: MicroUsd::ZERO,
            reason: DecisionReason::OwnerPreview,
        }
    }

    /// Whether this decision bills nothing
    pub fn is_owner_preview(&self) -> bool {
        self.reason == DecisionReason::OwnerPreview
    }
}

/// Outcome of recording an admitted session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Whether the session was charged
    pub recorded: bool,
    /// Overage credits deducted while recording (zero or one batch)
    pub credits_charged: u64,
    /// Amount charged
    pub session_cost: MicroUsd,
    /// Outcome reason
    pub reason: DecisionReason,
}

impl SessionRecord {
    /// Nothing was charged
    pub fn skipped(reason: DecisionReason) -> Self {
        Self {
            recorded: false,
            credits_charged: 0,
            session_cost: MicroUsd::ZERO,
            reason,
        }
    }
}

/// Outcome of a token admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionCheck {
    /// Whether the window has room for another session
    pub allowed: bool,
    /// Admissions recorded in the active window
    pub current_count: u64,
    /// Configured cap; `None` is unlimited
    pub limit: Option<u64>,
}

impl AdmissionCheck {
    /// Admission without a cap
    pub fn unlimited(current_count: u64) -> Self {
        Self {
            allowed: true,
            current_count,
            limit: None,
        }
    }

    /// Compare a count against an optional cap
    pub fn evaluate(current_count: u64, limit: Option<u64>) -> Self {
        match limit {
            None => Self::unlimited(current_count),
            Some(cap) => Self {
                allowed: current_count < cap,
                current_count,
                limit: Some(cap),
            },
        }
    }
}

/// Owner usage for the active month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Current tier
    pub tier: Tier,
    /// Tier budget (zero on the free tier)
    pub monthly_budget: MicroUsd,
    /// Budget added by overage batches this month
    pub top_up: MicroUsd,
    /// Budget consumed this month
    pub consumed: MicroUsd,
    /// Budget still available
    pub remaining: MicroUsd,
    /// AI-enabled sessions this month
    pub ai_sessions: u64,
    /// Non-AI sessions this month
    pub non_ai_sessions: u64,
    /// Free-tier ceiling; `None` on budgeted tiers
    pub session_limit: Option<u64>,
}

impl UsageStats {
    /// Sessions of both kinds this month
    pub fn total_sessions(&self) -> u64 {
        self.ai_sessions.saturating_add(self.non_ai_sessions)
    }
}

/// Daily admission usage of a distribution token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAccessStats {
    /// Configured cap; `None` is unlimited
    pub limit: Option<u64>,
    /// Admissions today
    pub current: u64,
    /// Admissions left today; `None` is unlimited
    pub remaining: Option<u64>,
}

/// How consumption is treated when an owner's tier changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierChangePolicy {
    /// Zero consumption, top-up and session counters (upgrade, renewal)
    Reset,
    /// Keep consumption and counters, swap only the tier (mid-cycle downgrade)
    Carry,
}

impl TierChangePolicy {
    /// Conventional policy for moving between two tiers
    pub fn for_transition(from: Tier, to: Tier) -> Self {
        match (from, to) {
            (Tier::Premium, Tier::Free) => Self::Carry,
            _ => Self::Reset,
        }
    }
}

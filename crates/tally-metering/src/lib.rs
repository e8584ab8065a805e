//! Tally Metering - session metering and admission control
//!
//! The engine decides, per content request, whether a visitor starts a
//! billable session and whether the content owner can pay for it.
//!
//! # Components
//!
//! - [`IdentityResolver`]: visitor fingerprint from request signals
//! - [`DedupGate`]: one billable session per visitor per window
//! - [`TokenLimiter`]: per-distribution-token daily and monthly caps
//! - [`BudgetLedger`]: tier budgets, session pricing and overage credits
//! - [`AccessLogger`]: write-behind decision log
//! - [`ContentGate`]: the request pipeline composing all of the above
//!
//! # Consistency
//!
//! The cache is the source of truth for every counter. Its atomic
//! claim-if-absent and increment are the only mutual-exclusion points;
//! limit and budget checks are plain reads that tolerate a bounded
//! overshoot under concurrency. The durable store is written only through
//! named transactions (credit purchase and deduction, tier change, log
//! append).
//!
//! # Failure policy
//!
//! Cache faults open the dedup gate and the limit checks. The budget
//! increment fails closed and surfaces as a retryable
//! [`TallyError::CacheUnavailable`](tally_core::TallyError).

#![forbid(unsafe_code)]

pub mod access_log;
pub mod cache_guard;
pub mod dedup;
pub mod identity;
pub mod ledger;
pub mod limiter;
pub mod pipeline;

pub use access_log::{AccessLogStatistics, AccessLogger};
pub use cache_guard::CacheGuard;
pub use dedup::{DedupClaim, DedupGate, DedupStatistics};
pub use identity::{FingerprintSource, IdentityResolver, RequestSignals};
pub use ledger::BudgetLedger;
pub use limiter::{LimiterStatistics, TokenLimiter};
pub use pipeline::{
    ContentEnvelope, ContentGate, ContentRequest, ContentSource, EnvelopeData, GateDependencies,
    StaticContentSource,
};

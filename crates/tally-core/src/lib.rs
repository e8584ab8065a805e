//! Tally Core - foundation of the session metering engine
//!
//! Types, configuration and effect interfaces shared by every other crate in
//! the workspace. This crate performs no I/O of its own beyond reading a
//! configuration file.
//!
//! # Architecture
//!
//! ## Data Model
//! - Identifiers: `OwnerId`, `ContentId`, `TokenId`, `VisitorFingerprint`
//! - Money: `MicroUsd` (integer micro-dollars)
//! - Windows: `MonthKey`, `DayKey`, `BillingWindow` (UTC)
//! - Decisions: `SessionCheck`, `SessionRecord`, `AdmissionCheck`
//!
//! ## Effect Interfaces
//! - `CacheEffects`: counter cache, source of truth for every mutable counter
//! - `LedgerEffects`: durable store, named transactional operations only
//! - `PhysicalTimeEffects`: wall clock
//! - `TaskSpawner`: detached work off the response path

#![forbid(unsafe_code)]

/// Access log entries
pub mod access_log;

/// Configuration loading and validation
pub mod config;

/// Check and record outcomes
pub mod decision;

/// Effect trait definitions
pub mod effects;

/// Unified error type
pub mod errors;

/// Opaque identifiers
pub mod identifiers;

/// Cache key schema
pub mod keys;

/// Integer currency
pub mod money;

/// Subscription tiers
pub mod tier;

/// Billing windows
pub mod window;

pub use access_log::AccessLogEntry;
pub use config::{MeteringConfig, Pricing};
pub use decision::{
    AdmissionCheck, DailyAccessStats, DecisionReason, SessionCheck, SessionRecord,
    TierChangePolicy, UsageStats,
};
pub use effects::{
    CacheEffects, CacheError, ContentProfile, CreditDeduction, DistributionToken, LedgerEffects,
    LedgerError, PhysicalTimeEffects, SubscriptionRecord, TaskSpawner, TimeError,
};
pub use errors::{Result, TallyError};
pub use identifiers::{ContentId, OwnerId, TokenId, VisitorFingerprint};
pub use money::MicroUsd;
pub use tier::Tier;
pub use window::{BillingWindow, DayKey, MonthKey};

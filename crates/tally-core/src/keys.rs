//! Cache key schema
//!
//! Every mutable counter lives in the cache under one of these keys. The
//! window component is part of the key, so rollover starts a new counter.

use crate::identifiers::{ContentId, OwnerId, TokenId, VisitorFingerprint};
use crate::window::{DayKey, MonthKey};

/// Consumed budget (micro-dollars) for an owner's month
pub fn owner_consumed(owner: &OwnerId, month: &MonthKey) -> String {
    format!("usage:user:{owner}:month:{month}")
}

/// Overage top-up credited to an owner's month (micro-dollars)
pub fn owner_topup(owner: &OwnerId, month: &MonthKey) -> String {
    format!("usage:user:{owner}:month:{month}:topup")
}

/// AI-enabled session count for an owner's month
pub fn owner_ai_sessions(owner: &OwnerId, month: &MonthKey) -> String {
    format!("usage:user:{owner}:month:{month}:sessions:ai")
}

/// Non-AI session count for an owner's month
pub fn owner_non_ai_sessions(owner: &OwnerId, month: &MonthKey) -> String {
    format!("usage:user:{owner}:month:{month}:sessions:nonai")
}

/// Cached subscription tier of an owner
pub fn owner_tier(owner: &OwnerId) -> String {
    format!("usage:user:{owner}:tier")
}

/// Daily admission count of a distribution token
pub fn token_daily(token: &TokenId, day: &DayKey) -> String {
    format!("usage:token:{token}:date:{day}:count")
}

/// Monthly admission count of a distribution token
pub fn token_monthly(token: &TokenId, month: &MonthKey) -> String {
    format!("usage:token:{token}:month:{month}:count")
}

/// Dedup claim for one visitor on one piece of content
pub fn dedup(content: &ContentId, fingerprint: &VisitorFingerprint) -> String {
    format!("dedup:{content}:{fingerprint}")
}

/// Cached AI-enabled flag of a piece of content
pub fn content_ai_enabled(content: &ContentId) -> String {
    format!("content:{content}:ai_enabled")
}

/// Prefix covering every cached rendering of a token's content
pub fn rendered_content_prefix(token: &TokenId) -> String {
    format!("content:render:{token}:")
}

/// Cached rendering of a token's content in one language
pub fn rendered_content(token: &TokenId, language: &str) -> String {
    format!("{}{language}", rendered_content_prefix(token))
}

/// List buffer holding serialized access log entries awaiting flush
pub const ACCESS_LOG_BUFFER: &str = "access_log:buffer";

//! Access log entries
//!
//! Entries are immutable once built. They are buffered as JSON strings in the
//! cache and appended to the durable store in batches.

use crate::identifiers::{ContentId, VisitorFingerprint};
use crate::money::MicroUsd;
use crate::tier::Tier;
use crate::Result;
use serde::{Deserialize, Serialize};

/// One admission decision, as recorded for analytics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Content that was served
    pub content_id: ContentId,
    /// Visitor that was served
    pub fingerprint: VisitorFingerprint,
    /// Owner tier at decision time
    pub owner_tier: Tier,
    /// Whether the session consumed overage budget
    pub is_overage: bool,
    /// Amount charged
    pub session_cost: MicroUsd,
    /// Whether the content runs the AI assistant
    pub is_ai_enabled: bool,
    /// Decision instant, unix milliseconds
    pub timestamp_ms: u64,
}

impl AccessLogEntry {
    /// Serialize for the cache buffer
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a buffered entry
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

//! Deduplication gate
//!
//! One atomic claim-if-absent per (content, visitor) decides whether a
//! request starts a billable session. The claim expires on its own. The only
//! explicit delete is `release`, for a claim whose billing failed, so the
//! visitor's retry is charged instead of served as a repeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::CacheEffects;
use tally_core::{keys, ContentId, VisitorFingerprint};
use tracing::{debug, error, warn};

const CLAIMED: &str = "1";
const DENIED_PREFIX: &str = "denied:";

/// Result of a dedup claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupClaim {
    /// Whether this call created the claim
    pub is_new_session: bool,
    /// Whether the cache failed and the gate opened
    pub degraded: bool,
}

/// Counters for gate activity
#[derive(Debug, Default)]
pub struct DedupStatistics {
    /// Claims won
    pub new_sessions: AtomicU64,
    /// Claims lost to an existing entry
    pub repeats: AtomicU64,
    /// Claims treated as new because the cache failed
    pub fail_open: AtomicU64,
    /// Claims given back after billing failed
    pub released: AtomicU64,
}

/// Per-(content, visitor) claim gate
pub struct DedupGate {
    cache: Arc<dyn CacheEffects>,
    window: Duration,
    stats: DedupStatistics,
}

impl DedupGate {
    /// Create a gate whose claims last `window`
    pub fn new(cache: Arc<dyn CacheEffects>, window: Duration) -> Self {
        Self {
            cache,
            window,
            stats: DedupStatistics::default(),
        }
    }

    /// Attempt to claim a new session. Cache failures open the gate.
    pub async fn claim(&self, content: &ContentId, fingerprint: &VisitorFingerprint) -> DedupClaim {
        let key = keys::dedup(content, fingerprint);
        match self.cache.set_if_absent(&key, CLAIMED, self.window).await {
            Ok(true) => {
                self.stats.new_sessions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    content = %content.short(),
                    visitor = %fingerprint.short(),
                    "New session claimed"
                );
                DedupClaim {
                    is_new_session: true,
                    degraded: false,
                }
            }
            Ok(false) => {
                self.stats.repeats.fetch_add(1, Ordering::Relaxed);
                debug!(
                    content = %content.short(),
                    visitor = %fingerprint.short(),
                    "Repeat session"
                );
                DedupClaim {
                    is_new_session: false,
                    degraded: false,
                }
            }
            Err(e) => {
                self.stats.fail_open.fetch_add(1, Ordering::Relaxed);
                warn!(
                    content = %content.short(),
                    error = %e,
                    "Dedup claim failed, treating as new session"
                );
                DedupClaim {
                    is_new_session: true,
                    degraded: true,
                }
            }
        }
    }

    /// Mark a claim as denied so repeats within the window replay the denial
    /// instead of being served as already-paid sessions.
    pub async fn mark_denied(
        &self,
        content: &ContentId,
        fingerprint: &VisitorFingerprint,
        denial: &str,
    ) {
        let key = keys::dedup(content, fingerprint);
        let value = format!("{DENIED_PREFIX}{denial}");
        if let Err(e) = self.cache.set(&key, &value, Some(self.window)).await {
            warn!(content = %content.short(), error = %e, "Failed to mark dedup claim as denied");
        }
    }

    /// Give back a claim whose session was never billed. Returns whether the
    /// claim is gone; on failure the window stays closed until it expires.
    pub async fn release(&self, content: &ContentId, fingerprint: &VisitorFingerprint) -> bool {
        let key = keys::dedup(content, fingerprint);
        match self.cache.delete(&[key]).await {
            Ok(_) => {
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                debug!(
                    content = %content.short(),
                    visitor = %fingerprint.short(),
                    "Dedup claim released"
                );
                true
            }
            Err(e) => {
                error!(
                    content = %content.short(),
                    visitor = %fingerprint.short(),
                    error = %e,
                    "Failed to release unbilled dedup claim"
                );
                false
            }
        }
    }

    /// Denial recorded on an existing claim, if any. Cache failures read as none.
    pub async fn recorded_denial(
        &self,
        content: &ContentId,
        fingerprint: &VisitorFingerprint,
    ) -> Option<String> {
        let key = keys::dedup(content, fingerprint);
        match self.cache.get(&key).await {
            Ok(Some(value)) => value.strip_prefix(DENIED_PREFIX).map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                warn!(content = %content.short(), error = %e, "Failed to read dedup claim");
                None
            }
        }
    }

    /// Gate activity counters
    pub fn statistics(&self) -> &DedupStatistics {
        &self.stats
    }
}

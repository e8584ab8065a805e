//! Billing windows
//!
//! Counters are keyed by the calendar window they belong to. A new window key
//! means a fresh counter, so rollover needs no explicit reset. Windows are
//! computed in UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar month key, `YYYY-MM`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthKey(String);

/// Calendar day key, `YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl MonthKey {
    /// Month containing the given unix timestamp (milliseconds)
    pub fn at(ts_ms: u64) -> Self {
        Self(utc(ts_ms).format("%Y-%m").to_string())
    }

    /// Raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DayKey {
    /// Day containing the given unix timestamp (milliseconds)
    pub fn at(ts_ms: u64) -> Self {
        Self(utc(ts_ms).format("%Y-%m-%d").to_string())
    }

    /// Raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Both windows active at one instant.
///
/// Resolved once per request so the daily and monthly checks of a single
/// decision can never straddle a rollover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingWindow {
    /// Active month
    pub month: MonthKey,
    /// Active day
    pub day: DayKey,
    /// Instant the window was resolved at, unix milliseconds
    pub resolved_at_ms: u64,
}

impl BillingWindow {
    /// Resolve the windows active at `ts_ms`
    pub fn at(ts_ms: u64) -> Self {
        Self {
            month: MonthKey::at(ts_ms),
            day: DayKey::at(ts_ms),
            resolved_at_ms: ts_ms,
        }
    }
}

fn utc(ts_ms: u64) -> DateTime<Utc> {
    let millis = i64::try_from(ts_ms).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-10-19T12:00:00Z
    const MID_OCTOBER: u64 = 1_792_411_200_000;

    #[test]
    fn formats_month_and_day() {
        let window = BillingWindow::at(MID_OCTOBER);
        assert_eq!(window.month.as_str(), "2026-10");
        assert_eq!(window.day.as_str(), "2026-10-19");
    }

    #[test]
    fn rolls_over_at_utc_midnight() {
        // 2026-10-31T23:59:59.999Z and one millisecond later
        let last_ms = 1_793_491_199_999;
        assert_eq!(MonthKey::at(last_ms).as_str(), "2026-10");
        assert_eq!(MonthKey::at(last_ms + 1).as_str(), "2026-11");
        assert_eq!(DayKey::at(last_ms + 1).as_str(), "2026-11-01");
    }

    #[test]
    fn epoch_is_valid() {
        assert_eq!(DayKey::at(0).as_str(), "1970-01-01");
    }
}

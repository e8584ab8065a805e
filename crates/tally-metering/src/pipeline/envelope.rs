//! Response envelope
//!
//! Limit outcomes are flags on a successful envelope. Only infrastructure
//! faults and invalid or disabled tokens become errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::MicroUsd;

/// Metering status returned alongside content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    /// Rendered content, absent when the request was denied
    pub content: Option<Value>,
    /// Whether the visitor may view the content
    pub allowed: bool,
    /// The owner's budget or free-tier ceiling is exhausted
    pub budget_exhausted: bool,
    /// The token reached its daily cap
    pub daily_limit_exceeded: bool,
    /// The token reached its monthly cap
    pub monthly_limit_exceeded: bool,
    /// The budget is exhausted and the owner holds too few credits
    pub credits_insufficient: bool,
    /// Amount billed for this request
    pub session_cost: MicroUsd,
    /// Whether this request started a billable session
    pub is_new_session: bool,
    /// Whether the session was paid from overage credits
    pub needs_overage: bool,
}

/// Full response to a content request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnvelope {
    /// Always true for a returned envelope
    pub success: bool,
    /// Content and metering flags
    pub data: EnvelopeData,
    /// Content came from the render cache
    pub cached: bool,
    /// The visitor already held a session in the dedup window
    pub deduplicated: bool,
}

/// Denial kinds replayed to repeat visitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Denial {
    Daily,
    Monthly,
    Budget,
    Credits,
}

impl Denial {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Denial::Daily => "daily",
            Denial::Monthly => "monthly",
            Denial::Budget => "budget",
            Denial::Credits => "credits",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(Denial::Daily),
            "monthly" => Some(Denial::Monthly),
            "budget" => Some(Denial::Budget),
            "credits" => Some(Denial::Credits),
            _ => None,
        }
    }

    pub(crate) fn apply(self, data: &mut EnvelopeData) {
        data.allowed = false;
        data.content = None;
        match self {
            Denial::Daily => data.daily_limit_exceeded = true,
            Denial::Monthly => data.monthly_limit_exceeded = true,
            Denial::Budget => data.budget_exhausted = true,
            Denial::Credits => {
                data.budget_exhausted = true;
                data.credits_insufficient = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_fields() {
        let envelope = ContentEnvelope {
            success: true,
            data: EnvelopeData {
                allowed: true,
                session_cost: MicroUsd::new(50_000),
                is_new_session: true,
                ..EnvelopeData::default()
            },
            cached: false,
            deduplicated: false,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["data"]["sessionCost"], 50_000);
        assert_eq!(json["data"]["isNewSession"], true);
        assert_eq!(json["data"]["dailyLimitExceeded"], false);
        assert!(json["data"]["content"].is_null());
    }

    #[test]
    fn credit_denial_sets_both_budget_flags() {
        let mut data = EnvelopeData {
            allowed: true,
            ..EnvelopeData::default()
        };
        Denial::parse(Denial::Credits.as_str())
            .unwrap()
            .apply(&mut data);
        assert!(!data.allowed);
        assert!(data.budget_exhausted);
        assert!(data.credits_insufficient);
        assert_eq!(Denial::parse("other"), None);
    }
}

//! Subscription tiers

use crate::TallyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Billing tier of a content owner.
///
/// The tier is owned by the durable store and cached by the metering engine;
/// it changes only through the payment collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Plain monthly session ceiling, no currency weighting, no overage
    #[default]
    Free,
    /// Monthly currency budget with AI-weighted session prices and overage credits
    Premium,
}

impl Tier {
    /// Stable string form used in cache values and access logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }

    /// Whether exhausted budgets may be extended with purchased credits
    pub fn supports_overage(&self) -> bool {
        matches!(self, Tier::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TallyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            other => Err(TallyError::invalid(format!("unknown tier '{other}'"))),
        }
    }
}

//! Metering configuration
//!
//! Business parameters (budgets, prices, windows) live here, never in engine
//! logic. Values are loaded from TOML, overridden by `TALLY_*` environment
//! variables and validated once. Currency amounts are configured in dollars
//! and converted to [`MicroUsd`] through [`MeteringConfig::pricing`].

use crate::money::MicroUsd;
use crate::tier::Tier;
use crate::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "TALLY_";

/// Top-level configuration of the metering engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Free-tier session ceiling
    pub free: FreeTierConfig,
    /// Premium-tier budget and prices
    pub premium: PremiumTierConfig,
    /// Overage credit batching
    pub overage: OverageConfig,
    /// Dedup window and counter lifetimes
    pub session: SessionConfig,
    /// Cache call policy
    pub cache: CacheConfig,
    /// Access log buffering
    pub access_log: AccessLogConfig,
    /// Rendered content caching
    pub content: ContentConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Free-tier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeTierConfig {
    /// New sessions per owner per month
    pub monthly_session_limit: u64,
}

impl Default for FreeTierConfig {
    fn default() -> Self {
        Self {
            monthly_session_limit: 50,
        }
    }
}

/// Premium-tier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumTierConfig {
    /// Monthly session budget in dollars
    pub monthly_budget_usd: f64,
    /// Price of a session on AI-enabled content
    pub ai_session_usd: f64,
    /// Price of a session on content without the AI assistant
    pub non_ai_session_usd: f64,
}

impl Default for PremiumTierConfig {
    fn default() -> Self {
        Self {
            monthly_budget_usd: 30.0,
            ai_session_usd: 0.05,
            non_ai_session_usd: 0.025,
        }
    }
}

/// Overage credit parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverageConfig {
    /// Credits consumed each time the budget is extended
    pub credits_per_batch: u64,
    /// Session budget bought by one credit, in dollars
    pub usd_per_credit: f64,
}

impl Default for OverageConfig {
    fn default() -> Self {
        Self {
            credits_per_batch: 5,
            usd_per_credit: 1.0,
        }
    }
}

/// Session and counter lifetimes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Span during which a repeat visitor is not rebilled
    pub dedup_window_secs: u64,
    /// Lifetime of a cached owner tier
    pub tier_cache_ttl_secs: u64,
    /// Lifetime of a token's daily counter
    pub daily_counter_ttl_secs: u64,
    /// Lifetime of monthly counters
    pub monthly_counter_ttl_secs: u64,
    /// Lifetime of a cached content AI flag
    pub content_profile_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 30 * 60,
            tier_cache_ttl_secs: 35 * SECS_PER_DAY,
            daily_counter_ttl_secs: 2 * SECS_PER_DAY,
            monthly_counter_ttl_secs: 35 * SECS_PER_DAY,
            content_profile_ttl_secs: 35 * SECS_PER_DAY,
        }
    }
}

impl SessionConfig {
    /// Dedup window as a duration
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Tier cache lifetime as a duration
    pub fn tier_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tier_cache_ttl_secs)
    }

    /// Daily counter lifetime as a duration
    pub fn daily_counter_ttl(&self) -> Duration {
        Duration::from_secs(self.daily_counter_ttl_secs)
    }

    /// Monthly counter lifetime as a duration
    pub fn monthly_counter_ttl(&self) -> Duration {
        Duration::from_secs(self.monthly_counter_ttl_secs)
    }

    /// Content flag lifetime as a duration
    pub fn content_profile_ttl(&self) -> Duration {
        Duration::from_secs(self.content_profile_ttl_secs)
    }
}

/// Cache call policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Deadline for a single cache call
    pub operation_timeout_ms: u64,
    /// Connection URL for networked cache backends
    pub url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 150,
            url: None,
        }
    }
}

impl CacheConfig {
    /// Per-call deadline as a duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Access log buffering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Buffered entries that trigger a detached flush
    pub flush_threshold: u64,
    /// Entries appended to the durable store per batch
    pub flush_batch_size: usize,
    /// Period of the background flusher
    pub flush_interval_secs: u64,
    /// Entries held in process while the cache is unreachable
    pub fallback_capacity: usize,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 100,
            flush_batch_size: 500,
            flush_interval_secs: 60,
            fallback_capacity: 1_000,
        }
    }
}

impl AccessLogConfig {
    /// Flush period as a duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Rendered content caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Lifetime of a cached rendering
    pub render_ttl_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            render_ttl_secs: 300,
        }
    }
}

impl ContentConfig {
    /// Rendering lifetime as a duration
    pub fn render_ttl(&self) -> Duration {
        Duration::from_secs(self.render_ttl_secs)
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Prices and budgets in integer micro-dollars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    /// Free-tier monthly session ceiling
    pub free_session_limit: u64,
    /// Premium monthly budget
    pub premium_budget: MicroUsd,
    /// Premium price of an AI-enabled session
    pub ai_session: MicroUsd,
    /// Premium price of a non-AI session
    pub non_ai_session: MicroUsd,
    /// Credits deducted per overage batch
    pub credits_per_batch: u64,
    /// Budget bought by one credit
    pub credit_value: MicroUsd,
}

impl Pricing {
    /// Price of one session. Free-tier sessions carry no currency weight.
    pub fn session_cost(&self, tier: Tier, ai_enabled: bool) -> MicroUsd {
        match (tier, ai_enabled) {
            (Tier::Free, _) => MicroUsd::ZERO,
            (Tier::Premium, true) => self.ai_session,
            (Tier::Premium, false) => self.non_ai_session,
        }
    }

    /// Monthly currency budget. Free tier has none; it is bounded by session count.
    pub fn monthly_budget(&self, tier: Tier) -> MicroUsd {
        match tier {
            Tier::Free => MicroUsd::ZERO,
            Tier::Premium => self.premium_budget,
        }
    }

    /// Budget added to the month when one batch of credits is consumed
    pub fn batch_value(&self) -> MicroUsd {
        self.credit_value.saturating_mul(self.credits_per_batch)
    }

    /// Extra sessions one batch buys at the given price
    pub fn sessions_per_batch(&self, ai_enabled: bool) -> u64 {
        self.batch_value()
            .whole_units_of(self.session_cost(Tier::Premium, ai_enabled))
    }
}

/// Settable keys, in dotted form. The environment form is
/// `TALLY_` + upper-cased key with dots replaced by underscores.
pub const CONFIG_KEYS: &[&str] = &[
    "free.monthly_session_limit",
    "premium.monthly_budget_usd",
    "premium.ai_session_usd",
    "premium.non_ai_session_usd",
    "overage.credits_per_batch",
    "overage.usd_per_credit",
    "session.dedup_window_secs",
    "session.tier_cache_ttl_secs",
    "session.daily_counter_ttl_secs",
    "session.monthly_counter_ttl_secs",
    "session.content_profile_ttl_secs",
    "cache.operation_timeout_ms",
    "cache.url",
    "access_log.flush_threshold",
    "access_log.flush_batch_size",
    "access_log.flush_interval_secs",
    "access_log.fallback_capacity",
    "content.render_ttl_secs",
    "logging.level",
];

impl MeteringConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TallyError::internal(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TallyError::invalid(format!("Invalid TOML: {}", e)))
    }

    /// Apply `TALLY_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `TALLY_*` overrides from an explicit variable list
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let env_key = suffix.to_ascii_lowercase();
            if let Some(key) = CONFIG_KEYS
                .iter()
                .find(|key| key.replace('.', "_") == env_key)
            {
                self.set_from_string(key, &value)?;
                tracing::debug!(key, "Configuration override from environment");
            }
        }
        Ok(())
    }

    /// Set one value by dotted key
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "free.monthly_session_limit" => self.free.monthly_session_limit = parse(key, value)?,
            "premium.monthly_budget_usd" => self.premium.monthly_budget_usd = parse(key, value)?,
            "premium.ai_session_usd" => self.premium.ai_session_usd = parse(key, value)?,
            "premium.non_ai_session_usd" => self.premium.non_ai_session_usd = parse(key, value)?,
            "overage.credits_per_batch" => self.overage.credits_per_batch = parse(key, value)?,
            "overage.usd_per_credit" => self.overage.usd_per_credit = parse(key, value)?,
            "session.dedup_window_secs" => self.session.dedup_window_secs = parse(key, value)?,
            "session.tier_cache_ttl_secs" => self.session.tier_cache_ttl_secs = parse(key, value)?,
            "session.daily_counter_ttl_secs" => {
                self.session.daily_counter_ttl_secs = parse(key, value)?
            }
            "session.monthly_counter_ttl_secs" => {
                self.session.monthly_counter_ttl_secs = parse(key, value)?
            }
            "session.content_profile_ttl_secs" => {
                self.session.content_profile_ttl_secs = parse(key, value)?
            }
            "cache.operation_timeout_ms" => self.cache.operation_timeout_ms = parse(key, value)?,
            "cache.url" => self.cache.url = Some(value.to_string()),
            "access_log.flush_threshold" => self.access_log.flush_threshold = parse(key, value)?,
            "access_log.flush_batch_size" => self.access_log.flush_batch_size = parse(key, value)?,
            "access_log.flush_interval_secs" => {
                self.access_log.flush_interval_secs = parse(key, value)?
            }
            "access_log.fallback_capacity" => {
                self.access_log.fallback_capacity = parse(key, value)?
            }
            "content.render_ttl_secs" => self.content.render_ttl_secs = parse(key, value)?,
            "logging.level" => self.logging.level = value.to_string(),
            other => {
                return Err(TallyError::invalid(format!(
                    "Unknown configuration key: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.free.monthly_session_limit == 0 {
            return Err(TallyError::invalid(
                "free.monthly_session_limit must be positive",
            ));
        }

        let pricing = self.pricing();
        if pricing.premium_budget == MicroUsd::ZERO {
            return Err(TallyError::invalid(
                "premium.monthly_budget_usd must be positive",
            ));
        }
        if pricing.non_ai_session == MicroUsd::ZERO {
            return Err(TallyError::invalid(
                "premium.non_ai_session_usd must be positive",
            ));
        }
        if pricing.ai_session <= pricing.non_ai_session {
            return Err(TallyError::invalid(
                "premium.ai_session_usd must be strictly above premium.non_ai_session_usd",
            ));
        }
        if self.overage.credits_per_batch == 0 || pricing.credit_value == MicroUsd::ZERO {
            return Err(TallyError::invalid(
                "overage batches must contain a positive number of positively valued credits",
            ));
        }
        if pricing.sessions_per_batch(true) == 0 {
            return Err(TallyError::invalid(
                "one overage batch must buy at least one AI-enabled session",
            ));
        }

        let windows = [
            ("session.dedup_window_secs", self.session.dedup_window_secs),
            ("session.tier_cache_ttl_secs", self.session.tier_cache_ttl_secs),
            (
                "session.daily_counter_ttl_secs",
                self.session.daily_counter_ttl_secs,
            ),
            (
                "session.monthly_counter_ttl_secs",
                self.session.monthly_counter_ttl_secs,
            ),
            (
                "session.content_profile_ttl_secs",
                self.session.content_profile_ttl_secs,
            ),
            ("cache.operation_timeout_ms", self.cache.operation_timeout_ms),
            (
                "access_log.flush_interval_secs",
                self.access_log.flush_interval_secs,
            ),
            ("access_log.flush_threshold", self.access_log.flush_threshold),
            ("content.render_ttl_secs", self.content.render_ttl_secs),
        ];
        if let Some((key, _)) = windows.iter().find(|(_, value)| *value == 0) {
            return Err(TallyError::invalid(format!("{} must be positive", key)));
        }
        if self.access_log.flush_batch_size == 0 {
            return Err(TallyError::invalid(
                "access_log.flush_batch_size must be positive",
            ));
        }

        Ok(())
    }

    /// Integer view of every price and budget
    pub fn pricing(&self) -> Pricing {
        Pricing {
            free_session_limit: self.free.monthly_session_limit,
            premium_budget: MicroUsd::from_usd(self.premium.monthly_budget_usd),
            ai_session: MicroUsd::from_usd(self.premium.ai_session_usd),
            non_ai_session: MicroUsd::from_usd(self.premium.non_ai_session_usd),
            credits_per_batch: self.overage.credits_per_batch,
            credit_value: MicroUsd::from_usd(self.overage.usd_per_credit),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TallyError::invalid(format!("Invalid value for {}: {}", key, e)))
}

//! `tally check-config`

use anyhow::{Context, Result};
use tally_core::MeteringConfig;

/// Print the effective configuration and the derived prices
pub fn run(config: &MeteringConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
    println!("{rendered}");

    let pricing = config.pricing();
    println!("# Derived pricing");
    println!("# premium budget:      {}", pricing.premium_budget);
    println!("# AI session:          {}", pricing.ai_session);
    println!("# non-AI session:      {}", pricing.non_ai_session);
    println!(
        "# overage batch:       {} credits = {}",
        pricing.credits_per_batch,
        pricing.batch_value()
    );
    println!(
        "# sessions per batch:  {} AI / {} non-AI",
        pricing.sessions_per_batch(true),
        pricing.sessions_per_batch(false)
    );
    tracing::info!("Configuration is valid");
    Ok(())
}

//! `tally usage`

use super::simulate::{SimulateArgs, Simulation};
use anyhow::Result;
use serde::Serialize;
use tally_core::effects::LedgerEffects;
use tally_core::{DailyAccessStats, MeteringConfig, UsageStats};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageReport {
    owner: String,
    usage: UsageStats,
    token: String,
    daily_access: DailyAccessStats,
    credit_balance: u64,
}

/// Run a quiet simulation, then print the owner's and token's usage as JSON
pub async fn run(config: &MeteringConfig, args: &SimulateArgs) -> Result<()> {
    let simulation = Simulation::build(config, args).await?;
    simulation.run(args, |_| {}).await?;

    let report = UsageReport {
        owner: simulation.owner.to_string(),
        usage: simulation.gate.usage_stats(&simulation.owner).await?,
        token: simulation.token.to_string(),
        daily_access: simulation.gate.daily_access_stats(&simulation.token).await?,
        credit_balance: simulation.store.credit_balance(&simulation.owner).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

//! Operator CLI for the Tally metering engine
//!
//! Validates configuration and drives synthetic traffic through the
//! metering pipeline against in-memory handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{check_config, simulate, usage};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally - session metering and admission control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "tally.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print the effective values
    CheckConfig,

    /// Run synthetic visitors through the pipeline and print each envelope
    Simulate(simulate::SimulateArgs),

    /// Run a simulation and print the owner's resulting usage
    Usage(simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(path = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::CheckConfig => check_config::run(&config)?,
        Commands::Simulate(args) => simulate::run(&config, &args).await?,
        Commands::Usage(args) => usage::run(&config, &args).await?,
    }

    Ok(())
}

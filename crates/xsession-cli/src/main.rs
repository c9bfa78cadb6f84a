//! XSession CLI - operator tool for edit-session ledgers
//!
//! Lists leases, runs expiry sweeps and force-releases stuck sessions in a
//! durable libSQL ledger.

mod cli;
mod commands;
mod error;

use clap::Parser;
use xsession_core::SessionConfig;

use crate::cli::{Cli, Commands};
use crate::commands::common::open_arbitrator;
use crate::commands::release::run_release;
use crate::commands::sessions::run_sessions;
use crate::commands::sweep::run_sweep;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xsession=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env()?;
    if let Some(path) = cli.ledger_path {
        config.ledger_path = Some(path);
    }
    let arbitrator = open_arbitrator(&config).await?;

    match cli.command {
        Commands::Sessions { json } => run_sessions(&arbitrator, json).await?,
        Commands::Sweep { watch } => run_sweep(arbitrator, &config, watch).await?,
        Commands::Release { file_id } => run_release(&arbitrator, &file_id).await?,
    }

    Ok(())
}

//! Prospector CLI: find active businesses by segment and region.
//!
//! Runs the discovery server, drives discovery runs against it, and
//! manages the local resolution cache.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

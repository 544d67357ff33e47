//! civicetl CLI: load civic open data into a queryable local database.
//!
//! Pulls councillor contacts, voting records and agenda items, stages them,
//! and rebuilds the derived views.

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

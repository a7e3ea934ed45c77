//! Gridrun CLI
//!
//! Command-line interface for operating a Gridrun executor through its
//! database.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gridrun")]
#[command(about = "Gridrun grid job CLI", long_about = None)]
struct Cli {
    /// Postgres database shared with the executor
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Executor workspace
    #[arg(long, env = "GRIDRUN_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Simulation the submitted jobs belong to
    #[arg(long, env = "GRIDRUN_SIMULATION_ID")]
    simulation_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        database_url: cli.database_url,
        workspace: cli.workspace,
        simulation_id: cli.simulation_id,
    };

    handle_command(cli.command, &config).await
}

//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod check;
mod jobs;
mod pending;
mod submit;

pub use jobs::JobCommands;
pub use pending::PendingCommands;
pub use submit::SubmitArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Verify the middleware tools are installed and working
    Check,
    /// Render a job description and queue it for submission
    Submit(SubmitArgs),
    /// Job management
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Pending submission queue
    Pending {
        #[command(subcommand)]
        command: PendingCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Check => check::handle_check(config).await,
        Commands::Submit(args) => submit::handle_submit(args, config).await,
        Commands::Jobs { command } => jobs::handle_jobs_command(command, config).await,
        Commands::Pending { command } => pending::handle_pending_command(command, config).await,
    }
}

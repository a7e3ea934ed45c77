//! Pending queue command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Pending subcommands
#[derive(Subcommand)]
pub enum PendingCommands {
    /// List submissions not yet accepted by the middleware
    List,
}

pub async fn handle_pending_command(command: PendingCommands, config: &Config) -> Result<()> {
    let executor_config = config.executor_config()?;
    let repos = config.repositories(&executor_config).await?;

    match command {
        PendingCommands::List => {
            let pending = repos.pending.list().await?;

            if pending.is_empty() {
                println!("{}", "No pending submissions.".yellow());
            } else {
                println!(
                    "{}",
                    format!("Found {} pending submission(s):", pending.len()).bold()
                );
                println!();
                for entry in pending {
                    println!("  {} {}", "▸".cyan(), entry.document_name().bold());
                    println!("    Command:    {}", entry.command);
                    println!("    Parameters: {}", entry.parameters.trim_end().dimmed());
                }
            }

            Ok(())
        }
    }
}

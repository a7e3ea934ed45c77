//! Submit command
//!
//! Renders the job description into the workspace and queues it. The running
//! executor picks the entry up on its next dispatch cycle.

use anyhow::Result;
use clap::Args;
use colored::*;
use gridrun_client::{DiracClient, Middleware};
use gridrun_core::dto::job::SubmitJob;
use gridrun_executor::Executor;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;

#[derive(Args)]
pub struct SubmitArgs {
    /// Logical command the script runs
    #[arg(short, long)]
    command: String,

    /// Override for the rendered description (diracSite, diracPriority, ...)
    #[arg(short, long, value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Script name under the workspace `sh` directory
    script: String,

    /// Parameters identifying this unit of work
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    parameters: Vec<String>,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_submit(args: SubmitArgs, config: &Config) -> Result<()> {
    let executor_config = config.executor_config()?;
    let repos = config.repositories(&executor_config).await?;
    let client = match &executor_config.dirac_env_script {
        Some(script) => DiracClient::with_env_script(script.clone()),
        None => DiracClient::new(),
    };
    let middleware: Arc<dyn Middleware> = Arc::new(client);

    let executor = Executor::load(executor_config, middleware, repos).await?;
    let job = SubmitJob {
        script_name: args.script,
        command: args.command,
        parameters: args.parameters,
        env: args.env.into_iter().collect::<HashMap<_, _>>(),
    };
    let file_name = executor.submit(job).await?;

    println!("{} Queued {}", "✓".green(), file_name.bold());
    Ok(())
}

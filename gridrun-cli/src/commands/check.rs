//! Middleware availability check

use anyhow::Result;
use colored::*;
use gridrun_client::{DiracClient, Middleware};

use crate::config::Config;

pub async fn handle_check(config: &Config) -> Result<()> {
    let executor_config = config.executor_config()?;
    let client = match &executor_config.dirac_env_script {
        Some(script) => DiracClient::with_env_script(script.clone()),
        None => DiracClient::new(),
    };

    match client.check_available().await {
        Ok(()) => {
            println!("{} Middleware tools are available", "✓".green());
            Ok(())
        }
        Err(e) if e.is_not_installed() => {
            println!("{} Middleware tools are not installed", "✗".red());
            Err(e.into())
        }
        Err(e) => {
            println!("{} Middleware tools are not working", "✗".red());
            Err(e.into())
        }
    }
}

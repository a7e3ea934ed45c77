//! Configuration module
//!
//! Command-line overrides layered on top of the executor's environment
//! configuration.

use anyhow::{Context, Result};
use gridrun_executor::db;
use gridrun_executor::repository::Repositories;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub workspace: Option<PathBuf>,
    pub simulation_id: Option<String>,
}

impl Config {
    /// Executor configuration with the command-line values applied
    pub fn executor_config(&self) -> Result<gridrun_executor::Config> {
        let mut config =
            gridrun_executor::Config::from_env().context("Invalid environment configuration")?;
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(workspace) = &self.workspace {
            config.workspace = workspace.clone();
        }
        if let Some(simulation_id) = &self.simulation_id {
            config.simulation_id = simulation_id.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Connects to the executor's database
    ///
    /// Every command except `check` needs it: an in-memory store would not
    /// be seen by the running executor.
    pub async fn repositories(&self, config: &gridrun_executor::Config) -> Result<Repositories> {
        let url = config
            .database_url
            .as_deref()
            .context("A database is required, set --database-url or DATABASE_URL")?;
        let pool = db::create_pool(url)
            .await
            .context("Failed to connect to the database")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Repositories::postgres(pool))
    }
}

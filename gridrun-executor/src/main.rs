//! Gridrun Executor daemon
//!
//! Loads the configuration, connects the stores, then keeps submitting and
//! monitoring queued jobs until SIGINT or SIGTERM. Jobs are queued by the
//! `gridrun` CLI through the shared database.

use anyhow::{Context, Result};
use gridrun_client::{DiracClient, Middleware};
use gridrun_executor::repository::Repositories;
use gridrun_executor::shutdown::install_shutdown_handler;
use gridrun_executor::{Config, Executor, db};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridrun_executor=info,gridrun_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gridrun Executor");

    let config = load_config()?;
    info!(
        "Loaded configuration: simulation_id={}, workspace={}",
        config.simulation_id,
        config.workspace.display()
    );

    let repos = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Repositories::postgres(pool)
        }
        None => {
            warn!("No database configured, job state will not survive a restart");
            Repositories::in_memory()
        }
    };

    let client = match &config.dirac_env_script {
        Some(script) => DiracClient::with_env_script(script.clone()),
        None => DiracClient::new(),
    };
    let middleware: Arc<dyn Middleware> = Arc::new(client);

    let shutdown = install_shutdown_handler().context("Failed to install signal handlers")?;

    let mut executor = Executor::load(config, middleware, repos).await?;
    executor.start();

    shutdown.cancelled().await;
    info!("Shutdown requested");
    executor.terminate().await;

    info!("Gridrun Executor stopped");
    Ok(())
}

/// Loads configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration")?;
    config.validate()?;
    Ok(config)
}

//! Executor configuration
//!
//! Defines all configurable parameters for the executor: polling intervals,
//! middleware environment, site banning, document rendering defaults and
//! output retrieval.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executor configuration
///
/// All intervals and retry bounds are configurable to allow tuning for
/// different deployments (test grids vs production VOs).
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of the run, embedded in every job name
    pub simulation_id: String,

    /// Root directory holding scripts, documents and retrieved outputs
    pub workspace: PathBuf,

    /// How often to poll the middleware for job statuses
    pub poll_interval: Duration,

    /// Script sourced before every middleware call
    pub dirac_env_script: Option<PathBuf>,

    /// Host running the minor-status notification service
    pub dirac_host: String,

    pub notification_enabled: bool,
    pub notification_port: u16,

    /// Adds random jitter to the CPU time of each document
    pub balance_enabled: bool,

    pub default_priority: i32,

    /// CPU time budget in seconds
    pub default_cpu_time: u32,

    /// Sites banned for every job
    pub banned_sites: Vec<String>,

    /// Patch banned sites of resubmitted documents from fault tracking
    pub dynamic_ban_enabled: bool,

    /// Site names reported by the middleware that are not real sites
    pub ignored_sites: Vec<String>,

    /// Ship invocation descriptor and configuration fragment with each job
    pub lightweight_workflow: bool,

    /// Retries after a failed output retrieval
    pub output_retries: u32,

    pub output_retry_delay: Duration,

    /// Failed attempts of one document that are resubmitted
    pub max_resubmissions: u32,

    /// Postgres URL; an in-memory store is used when absent
    pub database_url: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(simulation_id: String, workspace: PathBuf) -> Self {
        Self {
            simulation_id,
            workspace,
            poll_interval: Duration::from_secs(20),
            dirac_env_script: None,
            dirac_host: "localhost".to_string(),
            notification_enabled: false,
            notification_port: 50009,
            balance_enabled: false,
            default_priority: 1,
            default_cpu_time: 1800,
            banned_sites: Vec::new(),
            dynamic_ban_enabled: false,
            ignored_sites: vec!["Any".to_string(), "Multiple".to_string()],
            lightweight_workflow: false,
            output_retries: 3,
            output_retry_delay: Duration::from_secs(10),
            max_resubmissions: 2,
            database_url: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - GRIDRUN_SIMULATION_ID (default: gridrun)
    /// - GRIDRUN_WORKSPACE (default: .)
    /// - GRIDRUN_POLL_INTERVAL (seconds, default: 20)
    /// - GRIDRUN_DIRAC_ENV_SCRIPT
    /// - GRIDRUN_DIRAC_HOST (default: localhost)
    /// - GRIDRUN_NOTIFICATION_ENABLED (default: false)
    /// - GRIDRUN_NOTIFICATION_PORT (default: 50009)
    /// - GRIDRUN_BALANCE_ENABLED (default: false)
    /// - GRIDRUN_DEFAULT_PRIORITY (default: 1)
    /// - GRIDRUN_DEFAULT_CPU_TIME (seconds, default: 1800)
    /// - GRIDRUN_BANNED_SITES (comma separated)
    /// - GRIDRUN_DYNAMIC_BAN_ENABLED (default: false)
    /// - GRIDRUN_IGNORED_SITES (comma separated, default: Any,Multiple)
    /// - GRIDRUN_LIGHTWEIGHT_WORKFLOW (default: false)
    /// - GRIDRUN_OUTPUT_RETRIES (default: 3)
    /// - GRIDRUN_OUTPUT_RETRY_DELAY (seconds, default: 10)
    /// - GRIDRUN_MAX_RESUBMISSIONS (default: 2)
    /// - DATABASE_URL
    pub fn from_env() -> anyhow::Result<Self> {
        let simulation_id =
            std::env::var("GRIDRUN_SIMULATION_ID").unwrap_or_else(|_| "gridrun".to_string());
        let workspace = std::env::var("GRIDRUN_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut config = Self::new(simulation_id, workspace);

        if let Some(secs) = env_parse::<u64>("GRIDRUN_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(script) = std::env::var("GRIDRUN_DIRAC_ENV_SCRIPT") {
            config.dirac_env_script = Some(PathBuf::from(script));
        }
        if let Ok(host) = std::env::var("GRIDRUN_DIRAC_HOST") {
            config.dirac_host = host;
        }
        if let Some(enabled) = env_parse("GRIDRUN_NOTIFICATION_ENABLED")? {
            config.notification_enabled = enabled;
        }
        if let Some(port) = env_parse("GRIDRUN_NOTIFICATION_PORT")? {
            config.notification_port = port;
        }
        if let Some(enabled) = env_parse("GRIDRUN_BALANCE_ENABLED")? {
            config.balance_enabled = enabled;
        }
        if let Some(priority) = env_parse("GRIDRUN_DEFAULT_PRIORITY")? {
            config.default_priority = priority;
        }
        if let Some(cpu_time) = env_parse("GRIDRUN_DEFAULT_CPU_TIME")? {
            config.default_cpu_time = cpu_time;
        }
        if let Ok(sites) = std::env::var("GRIDRUN_BANNED_SITES") {
            config.banned_sites = split_list(&sites);
        }
        if let Some(enabled) = env_parse("GRIDRUN_DYNAMIC_BAN_ENABLED")? {
            config.dynamic_ban_enabled = enabled;
        }
        if let Ok(sites) = std::env::var("GRIDRUN_IGNORED_SITES") {
            config.ignored_sites = split_list(&sites);
        }
        if let Some(enabled) = env_parse("GRIDRUN_LIGHTWEIGHT_WORKFLOW")? {
            config.lightweight_workflow = enabled;
        }
        if let Some(retries) = env_parse("GRIDRUN_OUTPUT_RETRIES")? {
            config.output_retries = retries;
        }
        if let Some(secs) = env_parse::<u64>("GRIDRUN_OUTPUT_RETRY_DELAY")? {
            config.output_retry_delay = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse("GRIDRUN_MAX_RESUBMISSIONS")? {
            config.max_resubmissions = max;
        }
        config.database_url = std::env::var("DATABASE_URL").ok();

        Ok(config)
    }

    /// Adds a statically banned site
    pub fn with_banned_site(mut self, site: impl Into<String>) -> Self {
        self.banned_sites.push(site.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.simulation_id.trim().is_empty() {
            anyhow::bail!("simulation_id cannot be empty");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.default_cpu_time == 0 {
            anyhow::bail!("default_cpu_time must be greater than 0");
        }

        if self.notification_enabled && self.dirac_host.is_empty() {
            anyhow::bail!("dirac_host is required when notifications are enabled");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("database_url must start with postgres:// or postgresql://");
            }
        }

        Ok(())
    }

    /// Directory holding job scripts
    pub fn script_dir(&self) -> PathBuf {
        self.workspace.join("sh")
    }

    /// Directory holding rendered job description documents
    pub fn jdl_dir(&self) -> PathBuf {
        self.workspace.join("jdl")
    }

    /// Directory holding invocation descriptors (lightweight workflow mode)
    pub fn inv_dir(&self) -> PathBuf {
        self.workspace.join("inv")
    }

    /// Directory holding generated configuration fragments
    pub fn config_dir(&self) -> PathBuf {
        self.workspace.join("config")
    }

    pub fn workflow_file(&self) -> PathBuf {
        self.workspace.join("workflow.json")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.workspace.join("out")
    }

    pub fn err_dir(&self) -> PathBuf {
        self.workspace.join("err")
    }

    /// Scratch directory where output sandboxes are downloaded
    pub fn download_dir(&self) -> PathBuf {
        self.workspace.join("tmp")
    }

    /// Creates every workspace directory the executor writes to
    pub fn prepare_workspace(&self) -> std::io::Result<()> {
        for dir in [
            self.script_dir(),
            self.jdl_dir(),
            self.out_dir(),
            self.err_dir(),
            self.download_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn is_ignored_site(&self, site: &str) -> bool {
        self.ignored_sites.iter().any(|s| s == site)
    }

    /// Absolute form of the workspace, used in rendered documents
    pub fn absolute_workspace(&self) -> PathBuf {
        absolute(&self.workspace)
    }

    /// Copy of this configuration whose layout paths are absolute
    pub fn with_absolute_workspace(&self) -> Self {
        Self {
            workspace: self.absolute_workspace(),
            ..self.clone()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("gridrun".to_string(), PathBuf::from("."))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, value)),
        Err(_) => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

//! Gridrun middleware client
//!
//! A typed wrapper around the grid middleware command-line tools
//! (`dirac-wms-job-submit`, `dirac-wms-job-status`, ...).
//!
//! Every operation is a child process awaited to completion. The
//! [`Middleware`] trait is the seam used by the executor so that loops can be
//! driven by a scripted implementation in tests.
//!
//! # Example
//!
//! ```no_run
//! use gridrun_client::{DiracClient, Middleware};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DiracClient::new();
//!     client.check_available().await?;
//!
//!     for report in client.status(&["1234".to_string()]).await? {
//!         println!("{} is {:?}", report.job_id, report.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
pub mod parse;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use parse::{StatusReport, SubmitLine};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Operations the executor needs from the grid middleware
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Verifies the tools can be invoked at all
    async fn check_available(&self) -> Result<()>;

    /// Submits every document in one call
    ///
    /// # Returns
    /// One entry per output line, in batch order
    async fn submit(&self, documents: &[PathBuf]) -> Result<Vec<SubmitLine>>;

    /// Queries the status of every job in one call
    ///
    /// Lines that cannot be parsed are logged and left out.
    async fn status(&self, job_ids: &[String]) -> Result<Vec<StatusReport>>;

    /// Kills the given jobs
    async fn kill(&self, job_ids: &[String]) -> Result<()>;

    /// Puts a job back into the middleware's queue
    async fn reschedule(&self, job_id: &str) -> Result<()>;

    /// Downloads the output sandbox of a job under `dest`
    ///
    /// # Returns
    /// The directory holding the retrieved files
    async fn get_output(&self, job_id: &str, dest: &Path) -> Result<PathBuf>;
}

/// Captured result of a middleware tool invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// `bash -c` body: source `$1`, then run the remaining words as one command
const SOURCE_AND_RUN: &str = r#"source "$1"; shift; "$@""#;

/// Middleware client driving the DIRAC command-line tools
#[derive(Debug, Clone, Default)]
pub struct DiracClient {
    /// Script sourced before every call to set up the middleware environment
    env_script: Option<PathBuf>,
}

impl DiracClient {
    /// Create a client that expects the tools on `PATH`
    pub fn new() -> Self {
        Self { env_script: None }
    }

    /// Create a client that sources `env_script` before each call
    ///
    /// # Example
    /// ```
    /// use gridrun_client::DiracClient;
    ///
    /// let client = DiracClient::with_env_script("/opt/dirac/diracosrc");
    /// assert!(client.env_script().is_some());
    /// ```
    pub fn with_env_script(env_script: impl Into<PathBuf>) -> Self {
        Self {
            env_script: Some(env_script.into()),
        }
    }

    /// Get the environment script, if any
    pub fn env_script(&self) -> Option<&Path> {
        self.env_script.as_deref()
    }

    /// Build the process for a tool invocation
    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut command = match &self.env_script {
            Some(script) => {
                // Paths travel as positional parameters, never through the shell parser
                let mut command = Command::new("bash");
                command
                    .arg("-c")
                    .arg(SOURCE_AND_RUN)
                    .arg("gridrun")
                    .arg(script)
                    .arg(program)
                    .args(args);
                command
            }
            None => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };
        command.kill_on_drop(true);
        command
    }

    /// Run a tool to completion and capture its output
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        debug!("Executing {} {:?}", program, args);

        let mut command = self.command(program, args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|source| ClientError::SpawnFailed {
                command: program.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", program, stderr.trim());
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Run a tool and turn a non-zero exit code into an error
    async fn run_checked(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput> {
        let output = self.run(program, args, cwd).await?;
        if !output.success() {
            return Err(ClientError::command_failed(
                program,
                output.exit_code,
                &output.stdout,
                &output.stderr,
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DiracClient::new();
        assert!(client.env_script().is_none());
    }

    #[test]
    fn test_env_script_wraps_in_bash() {
        let client = DiracClient::with_env_script("/opt/dirac/diracosrc");
        let command = client.command("dirac-wms-job-kill", &["1".to_string(), "2".to_string()]);
        let std = command.as_std();
        assert_eq!(std.get_program(), "bash");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(
            args,
            vec![
                "-c",
                SOURCE_AND_RUN,
                "gridrun",
                "/opt/dirac/diracosrc",
                "dirac-wms-job-kill",
                "1",
                "2"
            ]
        );
    }

    #[tokio::test]
    async fn test_env_script_keeps_awkward_paths_intact() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("dirac env; rc");
        std::fs::write(&script, "show_args() { printf '%s\\n' \"$@\"; }\n").unwrap();

        let client = DiracClient::with_env_script(&script);
        let args = vec![
            "/work space/jdl/a b.jdl".to_string(),
            "it's $HOME".to_string(),
        ];
        let output = client.run("show_args", &args, None).await.unwrap();

        assert!(output.success(), "stderr: {}", output.stderr);
        assert_eq!(
            output.stdout.lines().collect::<Vec<_>>(),
            vec!["/work space/jdl/a b.jdl", "it's $HOME"]
        );
    }

    #[test]
    fn test_plain_command() {
        let client = DiracClient::new();
        let command = client.command("dirac-wms-job-status", &["9".to_string()]);
        let std = command.as_std();
        assert_eq!(std.get_program(), "dirac-wms-job-status");
        assert_eq!(std.get_args().collect::<Vec<_>>(), vec!["9"]);
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_failure() {
        let client = DiracClient::new();
        let err = client
            .run("gridrun-definitely-not-a-real-tool", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SpawnFailed { .. }));
    }
}

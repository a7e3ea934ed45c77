//! Job operations against the DIRAC tools

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{ClientError, Result};
use crate::parse::{StatusReport, SubmitLine, parse_status_line, parse_submit_output};
use crate::{DiracClient, Middleware};

const VERSION: &str = "dirac-version";
const SUBMIT: &str = "dirac-wms-job-submit";
const STATUS: &str = "dirac-wms-job-status";
const KILL: &str = "dirac-wms-job-kill";
const RESCHEDULE: &str = "dirac-wms-job-reschedule";
const GET_OUTPUT: &str = "dirac-wms-job-get-output";

#[async_trait]
impl Middleware for DiracClient {
    async fn check_available(&self) -> Result<()> {
        let output = match self.run(VERSION, &[], None).await {
            Ok(output) => output,
            Err(ClientError::SpawnFailed { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Err(ClientError::NotInstalled(format!("'{}' not found", VERSION)));
            }
            Err(e) => return Err(e),
        };

        match output.exit_code {
            0 => {
                info!("Middleware is available: {}", output.stdout.trim());
                Ok(())
            }
            127 => Err(ClientError::NotInstalled(output.stderr.trim().to_string())),
            code => Err(ClientError::command_failed(
                VERSION,
                code,
                &output.stdout,
                &output.stderr,
            )),
        }
    }

    async fn submit(&self, documents: &[PathBuf]) -> Result<Vec<SubmitLine>> {
        let args: Vec<String> = documents
            .iter()
            .map(|path| path.display().to_string())
            .collect();

        let output = self.run(SUBMIT, &args, None).await?;
        let lines = parse_submit_output(&output.stdout);

        // Partial batches still print one line per document, so the parsed
        // lines are returned even when the tool reports a failure.
        if !output.success() {
            error!(
                "{} exited with code {}: {}",
                SUBMIT,
                output.exit_code,
                output.stderr.trim()
            );
            if lines.is_empty() {
                return Err(ClientError::command_failed(
                    SUBMIT,
                    output.exit_code,
                    &output.stdout,
                    &output.stderr,
                ));
            }
        }

        Ok(lines)
    }

    async fn status(&self, job_ids: &[String]) -> Result<Vec<StatusReport>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let output = self.run(STATUS, job_ids, None).await?;

        let mut reports = Vec::new();
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_status_line(line) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Skipping status line: {}", e),
            }
        }

        if !output.success() && reports.is_empty() {
            return Err(ClientError::command_failed(
                STATUS,
                output.exit_code,
                &output.stdout,
                &output.stderr,
            ));
        }

        Ok(reports)
    }

    async fn kill(&self, job_ids: &[String]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        self.run_checked(KILL, job_ids, None).await?;
        info!("Killed job(s) {}", job_ids.join(", "));
        Ok(())
    }

    async fn reschedule(&self, job_id: &str) -> Result<()> {
        self.run_checked(RESCHEDULE, &[job_id.to_string()], None)
            .await?;
        info!("Rescheduled job {}", job_id);
        Ok(())
    }

    async fn get_output(&self, job_id: &str, dest: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest).await?;
        self.run_checked(GET_OUTPUT, &[job_id.to_string()], Some(dest))
            .await?;
        Ok(dest.join(job_id))
    }
}

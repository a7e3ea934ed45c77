//! Status monitor
//!
//! Polls `dirac-wms-job-status` for every active job and drives the local
//! state machine:
//!
//! ```text
//! SUCCESSFULLY_SUBMITTED -> QUEUED -> RUNNING -> COMPLETED | ERROR | CANCELLED | STALLED | DELETED
//! ```
//!
//! Replicas share an invocation id. Once one of them completes, every other
//! active replica is killed (`KILL_REPLICA`) and ends as `CANCELLED_REPLICA`
//! or `DELETED_REPLICA`, without output retrieval.
//!
//! Operator markers (`KILL`, `RESCHEDULE`, `REPLICATE`) are consumed at the
//! start of each cycle.

use anyhow::{Context, Result};
use chrono::Utc;
use gridrun_client::{Middleware, StatusReport};
use gridrun_core::domain::job::{Job, JobStatus, MiddlewareStatus};
use gridrun_core::domain::pending::PendingSubmission;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::{EventSink, JobEvent};
use crate::repository::Repositories;
use crate::service::{FaultySiteRegistry, OutputFinalizer};

/// Background loop reconciling local job state with the middleware
pub struct StatusMonitor {
    middleware: Arc<dyn Middleware>,
    repos: Repositories,
    finalizer: OutputFinalizer,
    sites: Arc<FaultySiteRegistry>,
    ignored_sites: Vec<String>,
    interval: Duration,
    events: EventSink,
    cancel: CancellationToken,
}

impl StatusMonitor {
    pub fn new(
        config: &Config,
        middleware: Arc<dyn Middleware>,
        repos: Repositories,
        finalizer: OutputFinalizer,
        sites: Arc<FaultySiteRegistry>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            middleware,
            repos,
            finalizer,
            sites,
            ignored_sites: config.ignored_sites.clone(),
            interval: config.poll_interval,
            events,
            cancel,
        }
    }

    /// Runs until the cancellation token fires, then kills every active job
    pub async fn run(mut self) -> Result<()> {
        info!("Starting status monitor (interval: {:?})", self.interval);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                Ok(reports) => debug!("Processed {} status report(s)", reports),
                Err(e) => error!("Error during monitor cycle: {:#}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.hard_kill().await;
        info!("Status monitor stopped");
        Ok(())
    }

    /// Runs one reconciliation cycle, returning the number of reports handled
    pub async fn poll_once(&mut self) -> Result<usize> {
        self.process_signals().await;

        let active = self
            .repos
            .jobs
            .find_active()
            .await
            .context("Failed to load active jobs")?;

        if active.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = active.iter().map(|job| job.id.clone()).collect();
        let reports = match self.middleware.status(&ids).await {
            Ok(reports) => reports,
            Err(e) if e.is_transient() => {
                warn!("Status query failed, retrying next cycle: {}", e);
                return Ok(0);
            }
            Err(e) => return Err(e).context("Failed to query job status"),
        };

        let mut seen = HashSet::new();
        for report in &reports {
            seen.insert(report.job_id.as_str());
            if let Err(e) = self.handle_report(report).await {
                error!("Failed to process status of job {}: {:#}", report.job_id, e);
            }
        }

        let missing: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !seen.contains(id))
            .collect();
        if !missing.is_empty() {
            warn!(
                "{} job(s) not reported by the middleware: {}",
                missing.len(),
                missing.join(", ")
            );
        }

        Ok(reports.len())
    }

    /// Acts on operator markers written since the last cycle
    async fn process_signals(&self) {
        for marker in [JobStatus::Kill, JobStatus::Reschedule, JobStatus::Replicate] {
            let jobs = match self.repos.jobs.find_by_status(marker).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("Failed to load {} jobs: {}", marker, e);
                    continue;
                }
            };

            for job in jobs {
                let id = job.id.clone();
                let result = match marker {
                    JobStatus::Kill => self.kill_signalled(job).await,
                    JobStatus::Reschedule => self.reschedule_signalled(job).await,
                    _ => self.replicate_signalled(job).await,
                };
                if let Err(e) = result {
                    error!("Failed to process {} for job {}: {:#}", marker, id, e);
                }
            }
        }
    }

    async fn kill_signalled(&self, mut job: Job) -> Result<()> {
        self.middleware
            .kill(std::slice::from_ref(&job.id))
            .await
            .context("Kill failed")?;

        // The middleware reports the job as Killed on a later cycle
        job.status = job.lifecycle_status();
        self.repos.jobs.update(&job).await?;
        info!("Killed job {}", job.id);
        Ok(())
    }

    async fn reschedule_signalled(&self, mut job: Job) -> Result<()> {
        self.middleware
            .reschedule(&job.id)
            .await
            .context("Reschedule failed")?;

        let from = job.lifecycle_status();
        job.status = JobStatus::SuccessfullySubmitted;
        self.repos.jobs.update(&job).await?;
        info!("Rescheduled job {}", job.id);
        self.emit_change(&job, from);
        Ok(())
    }

    async fn replicate_signalled(&self, mut job: Job) -> Result<()> {
        if job.replicating {
            info!("Job {} is already being replicated", job.id);
        } else {
            self.repos
                .pending
                .add(&PendingSubmission::new(
                    job.file_name.clone(),
                    job.command.clone(),
                    job.parameters.clone(),
                ))
                .await
                .context("Failed to queue replica")?;
            job.replicating = true;
            info!("Replicating job {} ({})", job.id, job.file_name);
        }

        job.status = job.lifecycle_status();
        self.repos.jobs.update(&job).await?;
        Ok(())
    }

    async fn handle_report(&mut self, report: &StatusReport) -> Result<()> {
        let Some(mut job) = self.repos.jobs.find_by_id(&report.job_id).await? else {
            warn!("Status reported for unknown job {}", report.job_id);
            return Ok(());
        };

        // Finalized earlier in this cycle, or marked by an operator since the
        // start of it
        if !job.status.is_active() || job.status.is_signal() {
            return Ok(());
        }

        if job.site.is_none() {
            if let Some(site) = &report.site {
                if !self.ignored_sites.iter().any(|s| s == site) {
                    job.site = Some(site.clone());
                    self.repos.jobs.update(&job).await?;
                }
            }
        }

        if job.status == JobStatus::KillReplica
            || self
                .repos
                .jobs
                .count_completed_by_invocation(job.invocation_id)
                .await?
                > 0
        {
            return self.handle_replica(job, report.status).await;
        }

        if let Some(terminal) = report.status.terminal_status() {
            return self.finish(job, terminal).await;
        }

        let Some(status) = report.status.progress_status() else {
            return Ok(());
        };
        if status == job.status {
            return Ok(());
        }

        let now = Utc::now();
        match status {
            JobStatus::Running => {
                job.started_at.get_or_insert(now);
            }
            JobStatus::Queued => {
                job.queued_at.get_or_insert(now);
            }
            _ => {}
        }

        let from = job.status;
        job.status = status;
        self.repos.jobs.update(&job).await?;
        info!("Job {} is now {}", job.id, status);
        self.emit_change(&job, from);
        Ok(())
    }

    /// Drives a replica whose invocation already has a winner
    async fn handle_replica(&self, mut job: Job, reported: MiddlewareStatus) -> Result<()> {
        let from = job.status;

        if reported.is_terminal() {
            job.status = if reported == MiddlewareStatus::Deleted {
                JobStatus::DeletedReplica
            } else {
                JobStatus::CancelledReplica
            };
            job.ended_at.get_or_insert(Utc::now());
            self.repos.jobs.update(&job).await?;
            info!("Replica {} finished as {}", job.id, job.status);
            self.emit_change(&job, from);
            return Ok(());
        }

        if job.status != JobStatus::KillReplica {
            self.kill_replica(job).await?;
        }
        Ok(())
    }

    async fn kill_replica(&self, mut job: Job) -> Result<()> {
        info!("Killing replica {} ({})", job.id, job.file_name);
        self.middleware
            .kill(std::slice::from_ref(&job.id))
            .await
            .with_context(|| format!("Failed to kill replica {}", job.id))?;

        let from = job.status;
        job.status = JobStatus::KillReplica;
        self.repos.jobs.update(&job).await?;
        self.emit_change(&job, from);
        Ok(())
    }

    /// Finalizes a job the middleware reports as terminal
    async fn finish(&mut self, mut job: Job, terminal: JobStatus) -> Result<()> {
        let from = job.status;
        let now = Utc::now();

        if job.queued_at.is_none() {
            job.queued_at = Some(job.started_at.unwrap_or(job.created_at));
        }
        if job.started_at.is_none() {
            job.started_at = job.queued_at;
        }
        job.ended_at = Some(now);
        job.status = terminal;
        // Keeps a concurrent replicate decision away from this job
        job.replicating = true;
        self.repos.jobs.update(&job).await?;
        info!("Job {} finished as {}", job.id, terminal);
        self.emit_change(&job, from);

        let record = self.finalizer.finalize(&job).await;
        job.exit_code = Some(record.exit_code.code());
        self.repos.jobs.update(&job).await?;

        if let Some(site) = &job.site {
            match terminal {
                JobStatus::Cancelled | JobStatus::Deleted => {}
                _ if record.is_success() => self.sites.report_success(&job.command, site),
                _ => {
                    let errors = self.sites.report_error(&job.command, site);
                    warn!(
                        "Job {} failed at {} ({} consecutive failure(s) for {})",
                        job.id, site, errors, job.command
                    );
                }
            }
        }

        self.events.emit(JobEvent::Finished(record.clone()));

        let banned = self.sites.banned_sites(&job.command);
        if let Err(e) = self
            .finalizer
            .resubmit_if_needed(&job, &record, &banned)
            .await
        {
            error!("Failed to resubmit job {}: {:#}", job.id, e);
        }

        if terminal == JobStatus::Completed {
            self.kill_replicas(&job).await?;
        }
        Ok(())
    }

    async fn kill_replicas(&self, winner: &Job) -> Result<()> {
        let replicas = self
            .repos
            .jobs
            .find_active_by_invocation(winner.invocation_id)
            .await
            .context("Failed to load replicas")?;

        for replica in replicas
            .into_iter()
            .filter(|job| job.id != winner.id && job.status != JobStatus::KillReplica)
        {
            let id = replica.id.clone();
            if let Err(e) = self.kill_replica(replica).await {
                error!("Failed to kill replica {}: {:#}", id, e);
            }
        }
        Ok(())
    }

    /// Best-effort kill of every active job before the monitor exits
    async fn hard_kill(&self) {
        let active = match self.repos.jobs.find_active().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to load active jobs for the kill sweep: {}", e);
                return;
            }
        };
        if active.is_empty() {
            return;
        }

        let ids: Vec<String> = active.into_iter().map(|job| job.id).collect();
        warn!("Killing {} active job(s) before shutdown", ids.len());
        if let Err(e) = self.middleware.kill(&ids).await {
            error!("Kill sweep failed: {}", e);
        }
    }

    fn emit_change(&self, job: &Job, from: JobStatus) {
        if from != job.status {
            self.events.emit(JobEvent::StatusChanged {
                job_id: job.id.clone(),
                from,
                to: job.status,
            });
        }
    }
}

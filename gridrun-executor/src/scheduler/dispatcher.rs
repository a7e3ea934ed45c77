//! Submission dispatcher
//!
//! Drains the pending queue into batched `dirac-wms-job-submit` calls. Each
//! output line is matched to the batch by position; accepted jobs are
//! registered for monitoring and removed from the queue, rejected ones stay
//! queued for the next cycle.

use anyhow::{Context, Result};
use gridrun_client::{Middleware, SubmitLine};
use gridrun_core::domain::job::Job;
use gridrun_core::domain::pending::PendingSubmission;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::events::{EventSink, JobEvent};
use crate::repository::Repositories;

/// Background loop submitting pending jobs
pub struct SubmissionDispatcher {
    middleware: Arc<dyn Middleware>,
    repos: Repositories,
    jdl_dir: PathBuf,
    interval: Duration,
    events: EventSink,
    cancel: CancellationToken,
}

impl SubmissionDispatcher {
    pub fn new(
        config: &Config,
        middleware: Arc<dyn Middleware>,
        repos: Repositories,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            middleware,
            repos,
            jdl_dir: config.with_absolute_workspace().jdl_dir(),
            // Submissions hold no grid resources, so they run twice as often
            interval: config.poll_interval / 2,
            events,
            cancel,
        }
    }

    /// Runs until the cancellation token fires
    pub async fn run(self) -> Result<()> {
        info!("Starting submission dispatcher (interval: {:?})", self.interval);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.dispatch_once().await {
                Ok(submitted) => {
                    if submitted > 0 {
                        info!("Submitted {} job(s) this cycle", submitted);
                    }
                }
                Err(e) => {
                    error!("Error during submission cycle: {:#}", e);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Submission dispatcher stopped");
        Ok(())
    }

    /// Submits every queued entry once, returning the number accepted
    pub async fn dispatch_once(&self) -> Result<usize> {
        let pending = self
            .repos
            .pending
            .list()
            .await
            .context("Failed to list pending submissions")?;

        if pending.is_empty() {
            debug!("No pending submissions");
            return Ok(0);
        }

        let documents: Vec<PathBuf> = pending
            .iter()
            .map(|entry| self.jdl_dir.join(entry.document_name()))
            .collect();

        info!("Submitting {} job(s)", documents.len());
        let lines = self
            .middleware
            .submit(&documents)
            .await
            .context("Failed to submit jobs")?;

        if lines.len() != pending.len() {
            warn!(
                "Middleware returned {} line(s) for {} submitted document(s)",
                lines.len(),
                pending.len()
            );
        }

        let mut accepted = 0;
        for (entry, line) in pending.iter().zip(lines) {
            match line {
                SubmitLine::Accepted(job_id) => match self.register(entry, &job_id).await {
                    Ok(()) => accepted += 1,
                    Err(e) => error!(
                        "Job {} was submitted but could not be registered: {:#}",
                        job_id, e
                    ),
                },
                SubmitLine::Rejected(raw) => {
                    error!("Submission of {} failed: {}", entry.file_name, raw);
                }
            }
        }

        Ok(accepted)
    }

    async fn register(&self, entry: &PendingSubmission, job_id: &str) -> Result<()> {
        let siblings = self
            .repos
            .jobs
            .find_by_parameters(&entry.parameters)
            .await
            .context("Failed to load jobs with the same parameters")?;

        for mut sibling in siblings.iter().filter(|job| job.replicating).cloned() {
            sibling.replicating = false;
            self.repos
                .jobs
                .update(&sibling)
                .await
                .context("Failed to clear replicating flag")?;
        }

        let invocation_id = siblings
            .iter()
            .find(|job| job.file_name == entry.file_name)
            .map_or_else(Uuid::new_v4, |job| job.invocation_id);

        let job = Job::submitted(
            job_id,
            invocation_id,
            entry.file_name.clone(),
            entry.command.clone(),
            entry.parameters.clone(),
        );
        self.repos
            .jobs
            .add(&job)
            .await
            .context("Failed to register job")?;
        self.repos
            .pending
            .remove(&entry.file_name)
            .await
            .context("Failed to remove pending submission")?;

        info!("Job {} submitted ({})", job_id, entry.file_name);
        self.events.emit(JobEvent::Submitted {
            job_id: job_id.to_string(),
            file_name: entry.file_name.clone(),
        });
        Ok(())
    }
}

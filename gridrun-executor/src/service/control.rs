//! Operator control markers
//!
//! Operators do not call the middleware directly: they write a marker status
//! (`KILL`, `RESCHEDULE`, `REPLICATE`) on the job record and the monitor acts
//! on it at the start of its next cycle.

use anyhow::{Context, Result, bail};
use gridrun_core::domain::job::{Job, JobStatus};
use tracing::info;

use crate::repository::JobRepository;

/// Writes `marker` on an active job
pub async fn signal_job(jobs: &dyn JobRepository, job_id: &str, marker: JobStatus) -> Result<Job> {
    if !marker.is_signal() {
        bail!("{} is not a control marker", marker);
    }

    let mut job = jobs
        .find_by_id(job_id)
        .await
        .context("Failed to load job")?
        .with_context(|| format!("Job {} not found", job_id))?;

    if !job.status.is_active() {
        bail!("Job {} is already {}", job_id, job.status);
    }
    if job.status == JobStatus::KillReplica {
        bail!("Job {} is being killed as a replica", job_id);
    }

    job.status = marker;
    jobs.update(&job).await.context("Failed to store marker")?;
    info!("Job {} marked {}", job_id, marker);
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryJobRepository;
    use uuid::Uuid;

    async fn repo_with(status: JobStatus) -> InMemoryJobRepository {
        let repo = InMemoryJobRepository::new();
        let mut job = Job::submitted("1", Uuid::new_v4(), "inv-1", "bet", "");
        job.status = status;
        repo.add(&job).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_signal_active_job() {
        let repo = repo_with(JobStatus::Running).await;
        let job = signal_job(&repo, "1", JobStatus::Kill).await.unwrap();
        assert_eq!(job.status, JobStatus::Kill);
        assert_eq!(
            repo.find_by_id("1").await.unwrap().unwrap().status,
            JobStatus::Kill
        );
    }

    #[tokio::test]
    async fn test_signal_rejects_finished_job() {
        let repo = repo_with(JobStatus::Completed).await;
        assert!(signal_job(&repo, "1", JobStatus::Reschedule).await.is_err());
    }

    #[tokio::test]
    async fn test_signal_rejects_non_marker_and_unknown_job() {
        let repo = repo_with(JobStatus::Queued).await;
        assert!(signal_job(&repo, "1", JobStatus::Completed).await.is_err());
        assert!(signal_job(&repo, "2", JobStatus::Kill).await.is_err());
    }
}

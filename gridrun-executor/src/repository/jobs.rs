//! Job repository
//!
//! Stores one row per submitted job, keyed by the middleware's identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridrun_core::domain::job::{Job, JobStatus};
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use super::{RepositoryError, Result};

/// Repository trait for job records
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a newly submitted job
    async fn add(&self, job: &Job) -> Result<()>;

    /// Overwrites the stored record with `job`
    async fn update(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Jobs the monitor still has to poll
    async fn find_active(&self) -> Result<Vec<Job>>;

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Active replicas of an invocation
    async fn find_active_by_invocation(&self, invocation_id: Uuid) -> Result<Vec<Job>>;

    /// Number of replicas of an invocation that completed
    async fn count_completed_by_invocation(&self, invocation_id: Uuid) -> Result<usize>;

    /// Jobs sharing a parameter signature
    async fn find_by_parameters(&self, parameters: &str) -> Result<Vec<Job>>;

    async fn list_all(&self) -> Result<Vec<Job>>;
}

/// In-memory implementation of JobRepository
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, filter: impl Fn(&Job) -> bool) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.iter().filter(|job| filter(job)).cloned().collect()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn add(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|existing| existing.id != job.id);
        jobs.push(job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let stored = jobs
            .iter_mut()
            .find(|existing| existing.id == job.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job.id)))?;
        *stored = job.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.select(|job| job.id == id).into_iter().next())
    }

    async fn find_active(&self) -> Result<Vec<Job>> {
        Ok(self.select(|job| job.status.is_active()))
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self.select(|job| job.status == status))
    }

    async fn find_active_by_invocation(&self, invocation_id: Uuid) -> Result<Vec<Job>> {
        Ok(self.select(|job| job.invocation_id == invocation_id && job.status.is_active()))
    }

    async fn count_completed_by_invocation(&self, invocation_id: Uuid) -> Result<usize> {
        Ok(self
            .select(|job| job.invocation_id == invocation_id && job.status == JobStatus::Completed)
            .len())
    }

    async fn find_by_parameters(&self, parameters: &str) -> Result<Vec<Job>> {
        Ok(self.select(|job| job.parameters == parameters))
    }

    async fn list_all(&self) -> Result<Vec<Job>> {
        Ok(self.select(|_| true))
    }
}

/// Postgres implementation of JobRepository
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_JOBS: &str = r#"
    SELECT id, invocation_id, file_name, command, parameters, status, site,
           created_at, queued_at, started_at, ended_at, exit_code, replicating
    FROM jobs
"#;

fn active_statuses() -> Vec<String> {
    JobStatus::ALL
        .into_iter()
        .filter(JobStatus::is_active)
        .map(|status| status.as_str().to_string())
        .collect()
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn add(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, invocation_id, file_name, command, parameters, status, site,
                              created_at, queued_at, started_at, ended_at, exit_code, replicating)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&job.id)
        .bind(job.invocation_id)
        .bind(&job.file_name)
        .bind(&job.command)
        .bind(&job.parameters)
        .bind(job.status.as_str())
        .bind(&job.site)
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.exit_code)
        .bind(job.replicating)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, site = $2, queued_at = $3, started_at = $4, ended_at = $5,
                exit_code = $6, replicating = $7
            WHERE id = $8
            "#,
        )
        .bind(job.status.as_str())
        .bind(&job.site)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.exit_code)
        .bind(job.replicating)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = $1", SELECT_JOBS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn find_active(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE status = ANY($1) ORDER BY created_at ASC",
            SELECT_JOBS
        ))
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE status = $1 ORDER BY created_at ASC",
            SELECT_JOBS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_active_by_invocation(&self, invocation_id: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE invocation_id = $1 AND status = ANY($2)",
            SELECT_JOBS
        ))
        .bind(invocation_id)
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_completed_by_invocation(&self, invocation_id: Uuid) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE invocation_id = $1 AND status = $2")
                .bind(invocation_id)
                .bind(JobStatus::Completed.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as usize)
    }

    async fn find_by_parameters(&self, parameters: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!("{} WHERE parameters = $1", SELECT_JOBS))
            .bind(parameters)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn list_all(&self) -> Result<Vec<Job>> {
        let rows =
            sqlx::query_as::<_, JobRow>(&format!("{} ORDER BY created_at DESC", SELECT_JOBS))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    invocation_id: Uuid,
    file_name: String,
    command: String,
    parameters: String,
    status: String,
    site: Option<String>,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    replicating: bool,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(Job {
            id: row.id,
            invocation_id: row.invocation_id,
            file_name: row.file_name,
            command: row.command,
            parameters: row.parameters,
            status,
            site: row.site,
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            exit_code: row.exit_code,
            replicating: row.replicating,
        })
    }
}

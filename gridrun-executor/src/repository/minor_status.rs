//! Minor status repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridrun_core::domain::minor_status::MinorStatus;
use sqlx::PgPool;
use std::sync::Mutex;

use super::Result;

/// Repository trait for minor status notifications
#[async_trait]
pub trait MinorStatusRepository: Send + Sync {
    async fn add(&self, status: &MinorStatus) -> Result<()>;

    /// Notifications for a job, in the order they were recorded
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<MinorStatus>>;
}

/// In-memory implementation of MinorStatusRepository
#[derive(Default)]
pub struct InMemoryMinorStatusRepository {
    statuses: Mutex<Vec<MinorStatus>>,
}

impl InMemoryMinorStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MinorStatusRepository for InMemoryMinorStatusRepository {
    async fn add(&self, status: &MinorStatus) -> Result<()> {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(status.clone());
        Ok(())
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<MinorStatus>> {
        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        Ok(statuses
            .iter()
            .filter(|status| status.job_id == job_id)
            .cloned()
            .collect())
    }
}

/// Postgres implementation of MinorStatusRepository
pub struct PgMinorStatusRepository {
    pool: PgPool,
}

impl PgMinorStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MinorStatusRepository for PgMinorStatusRepository {
    async fn add(&self, status: &MinorStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_minor_statuses (job_id, code, recorded_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&status.job_id)
        .bind(status.code)
        .bind(status.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<MinorStatus>> {
        let rows = sqlx::query_as::<_, (String, i32, DateTime<Utc>)>(
            r#"
            SELECT job_id, code, recorded_at
            FROM job_minor_statuses
            WHERE job_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(job_id, code, recorded_at)| MinorStatus {
                job_id,
                code,
                recorded_at,
            })
            .collect())
    }
}

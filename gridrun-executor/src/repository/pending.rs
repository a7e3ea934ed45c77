//! Pending submission repository
//!
//! Write-ahead buffer between enqueueing a job and the middleware accepting
//! it. Entries are keyed by the document base name.

use async_trait::async_trait;
use gridrun_core::domain::pending::PendingSubmission;
use sqlx::PgPool;
use std::sync::Mutex;

use super::Result;

/// Repository trait for pending submissions
#[async_trait]
pub trait PendingRepository: Send + Sync {
    /// Queues a submission, replacing any entry with the same file name
    async fn add(&self, pending: &PendingSubmission) -> Result<()>;

    /// All queued submissions, oldest first
    async fn list(&self) -> Result<Vec<PendingSubmission>>;

    async fn remove(&self, file_name: &str) -> Result<()>;
}

/// In-memory implementation of PendingRepository
#[derive(Default)]
pub struct InMemoryPendingRepository {
    entries: Mutex<Vec<PendingSubmission>>,
}

impl InMemoryPendingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingRepository for InMemoryPendingRepository {
    async fn add(&self, pending: &PendingSubmission) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries
            .iter_mut()
            .find(|entry| entry.file_name == pending.file_name)
        {
            Some(entry) => *entry = pending.clone(),
            None => entries.push(pending.clone()),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PendingSubmission>> {
        Ok(self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn remove(&self, file_name: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|entry| entry.file_name != file_name);
        Ok(())
    }
}

/// Postgres implementation of PendingRepository
pub struct PgPendingRepository {
    pool: PgPool,
}

impl PgPendingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingRepository for PgPendingRepository {
    async fn add(&self, pending: &PendingSubmission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_submissions (file_name, command, parameters, enqueued_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (file_name)
            DO UPDATE SET command = EXCLUDED.command, parameters = EXCLUDED.parameters
            "#,
        )
        .bind(&pending.file_name)
        .bind(&pending.command)
        .bind(&pending.parameters)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<PendingSubmission>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT file_name, command, parameters
            FROM pending_submissions
            ORDER BY enqueued_at ASC, file_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PendingSubmission::from).collect())
    }

    async fn remove(&self, file_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_submissions WHERE file_name = $1")
            .bind(file_name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    file_name: String,
    command: String,
    parameters: String,
}

impl From<PendingRow> for PendingSubmission {
    fn from(row: PendingRow) -> Self {
        PendingSubmission::new(row.file_name, row.command, row.parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_keeps_insertion_order() {
        let repo = InMemoryPendingRepository::new();
        repo.add(&PendingSubmission::new("b", "cmd", "")).await.unwrap();
        repo.add(&PendingSubmission::new("a", "cmd", "")).await.unwrap();

        let names: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.file_name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_in_memory_add_replaces_same_file() {
        let repo = InMemoryPendingRepository::new();
        repo.add(&PendingSubmission::new("a", "cmd", "-x 1 ")).await.unwrap();
        repo.add(&PendingSubmission::new("a", "cmd", "-x 2 ")).await.unwrap();

        let entries = repo.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].parameters, "-x 2 ");

        repo.remove("a").await.unwrap();
        assert!(repo.list().await.unwrap().is_empty());
    }
}

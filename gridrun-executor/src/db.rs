use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Jobs known to the monitor, one row per middleware job id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id VARCHAR(64) PRIMARY KEY,
            invocation_id UUID NOT NULL,
            file_name VARCHAR(255) NOT NULL,
            command TEXT NOT NULL,
            parameters TEXT NOT NULL,
            status VARCHAR(50) NOT NULL,
            site VARCHAR(255),
            created_at TIMESTAMPTZ NOT NULL,
            queued_at TIMESTAMPTZ,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            exit_code INTEGER,
            replicating BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_submissions (
            file_name VARCHAR(255) PRIMARY KEY,
            command TEXT NOT NULL,
            parameters TEXT NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_minor_statuses (
            id SERIAL PRIMARY KEY,
            job_id VARCHAR(64) NOT NULL,
            code INTEGER NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_invocation_id ON jobs(invocation_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_parameters ON jobs(parameters)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_minor_statuses_job_id ON job_minor_statuses(job_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

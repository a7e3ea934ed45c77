//! Repository layer
//!
//! Repositories are the durable store shared by the dispatcher and the
//! monitor. All cross-loop coordination goes through them, so a restart
//! between any two steps leaves a consistent state behind.
//!
//! All repositories are trait-based; each has an in-memory implementation
//! (tests, store-less runs) and a Postgres implementation.

mod jobs;
mod minor_status;
mod pending;

use std::sync::Arc;
use thiserror::Error;

// Re-export traits
pub use jobs::JobRepository;
pub use minor_status::MinorStatusRepository;
pub use pending::PendingRepository;

// Re-export implementations
pub use jobs::{InMemoryJobRepository, PgJobRepository};
pub use minor_status::{InMemoryMinorStatusRepository, PgMinorStatusRepository};
pub use pending::{InMemoryPendingRepository, PgPendingRepository};

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors raised by the store
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a domain value
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// The set of repositories an executor runs against
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub pending: Arc<dyn PendingRepository>,
    pub minor_statuses: Arc<dyn MinorStatusRepository>,
}

impl Repositories {
    /// Repositories kept in process memory
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobRepository::new()),
            pending: Arc::new(InMemoryPendingRepository::new()),
            minor_statuses: Arc::new(InMemoryMinorStatusRepository::new()),
        }
    }

    /// Repositories backed by a Postgres pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            pending: Arc::new(PgPendingRepository::new(pool.clone())),
            minor_statuses: Arc::new(PgMinorStatusRepository::new(pool)),
        }
    }
}

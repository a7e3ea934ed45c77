//! Minor status domain type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fine-grained progress notification pushed by the middleware service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorStatus {
    pub job_id: String,
    pub code: i32,
    pub recorded_at: DateTime<Utc>,
}

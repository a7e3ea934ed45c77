//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A job submitted to the grid middleware
///
/// Replicas of the same logical unit of work share `invocation_id` and
/// `file_name`; each replica has its own external `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// External identifier assigned by the middleware on submission
    pub id: String,
    pub invocation_id: Uuid,
    /// Base name of the job description document (without extension)
    pub file_name: String,
    pub command: String,
    pub parameters: String,
    pub status: JobStatus,
    /// First execution site reported by the middleware
    pub site: Option<String>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Set while a replica of this job is being submitted
    pub replicating: bool,
}

impl Job {
    /// Creates a freshly submitted job
    pub fn submitted(
        id: impl Into<String>,
        invocation_id: Uuid,
        file_name: impl Into<String>,
        command: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            invocation_id,
            file_name: file_name.into(),
            command: command.into(),
            parameters: parameters.into(),
            status: JobStatus::SuccessfullySubmitted,
            site: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            ended_at: None,
            exit_code: None,
            replicating: false,
        }
    }

    /// Status the job had before a control marker was written on it
    pub fn lifecycle_status(&self) -> JobStatus {
        if self.started_at.is_some() {
            JobStatus::Running
        } else if self.queued_at.is_some() {
            JobStatus::Queued
        } else {
            JobStatus::SuccessfullySubmitted
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    SuccessfullySubmitted,
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
    Stalled,
    Deleted,
    CancelledReplica,
    DeletedReplica,
    /// Operator asked for the job to be killed
    Kill,
    /// Kill issued because another replica of the invocation completed
    KillReplica,
    /// Operator asked for an extra replica
    Replicate,
    /// Operator asked for the job to be rescheduled
    Reschedule,
}

impl JobStatus {
    pub const ALL: [JobStatus; 14] = [
        JobStatus::SuccessfullySubmitted,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Stalled,
        JobStatus::Deleted,
        JobStatus::CancelledReplica,
        JobStatus::DeletedReplica,
        JobStatus::Kill,
        JobStatus::KillReplica,
        JobStatus::Replicate,
        JobStatus::Reschedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::SuccessfullySubmitted => "SUCCESSFULLY_SUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Error => "ERROR",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Stalled => "STALLED",
            JobStatus::Deleted => "DELETED",
            JobStatus::CancelledReplica => "CANCELLED_REPLICA",
            JobStatus::DeletedReplica => "DELETED_REPLICA",
            JobStatus::Kill => "KILL",
            JobStatus::KillReplica => "KILL_REPLICA",
            JobStatus::Replicate => "REPLICATE",
            JobStatus::Reschedule => "RESCHEDULE",
        }
    }

    /// Whether the job has reached the end of its lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Error
                | JobStatus::Cancelled
                | JobStatus::Stalled
                | JobStatus::Deleted
                | JobStatus::CancelledReplica
                | JobStatus::DeletedReplica
        )
    }

    /// Whether the monitor still polls the middleware for this job
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Control markers written by operators and consumed by the monitor
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            JobStatus::Kill | JobStatus::Replicate | JobStatus::Reschedule
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Job status as reported by the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiddlewareStatus {
    Received,
    Checking,
    Staging,
    Waiting,
    Matched,
    Rescheduled,
    Running,
    Completing,
    Completed,
    Done,
    Failed,
    Killed,
    Stalled,
    Deleted,
}

impl MiddlewareStatus {
    /// Local status for a non-terminal report, if the report maps to one
    pub fn progress_status(&self) -> Option<JobStatus> {
        match self {
            MiddlewareStatus::Running => Some(JobStatus::Running),
            MiddlewareStatus::Waiting => Some(JobStatus::Queued),
            MiddlewareStatus::Received => Some(JobStatus::SuccessfullySubmitted),
            _ => None,
        }
    }

    /// Local status for a terminal report
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self {
            MiddlewareStatus::Done => Some(JobStatus::Completed),
            MiddlewareStatus::Failed => Some(JobStatus::Error),
            MiddlewareStatus::Killed => Some(JobStatus::Cancelled),
            MiddlewareStatus::Stalled => Some(JobStatus::Stalled),
            MiddlewareStatus::Deleted => Some(JobStatus::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_status().is_some()
    }
}

impl FromStr for MiddlewareStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "Received" => MiddlewareStatus::Received,
            "Checking" => MiddlewareStatus::Checking,
            "Staging" => MiddlewareStatus::Staging,
            "Waiting" => MiddlewareStatus::Waiting,
            "Matched" => MiddlewareStatus::Matched,
            "Rescheduled" => MiddlewareStatus::Rescheduled,
            "Running" => MiddlewareStatus::Running,
            "Completing" => MiddlewareStatus::Completing,
            "Completed" => MiddlewareStatus::Completed,
            "Done" => MiddlewareStatus::Done,
            "Failed" => MiddlewareStatus::Failed,
            "Killed" => MiddlewareStatus::Killed,
            "Stalled" => MiddlewareStatus::Stalled,
            "Deleted" => MiddlewareStatus::Deleted,
            other => return Err(format!("unknown middleware status '{}'", other)),
        };
        Ok(status)
    }
}

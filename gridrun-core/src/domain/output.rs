//! Job output domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Classification of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    Success,
    ErrorReadGrid,
    ErrorWriteGrid,
    ErrorFileNotFound,
    ExecutionFailed,
    ErrorWriteLocal,
    ErrorGetStd,
    ExecutionCanceled,
    ExecutionStalled,
    Undefined,
}

impl ExitCode {
    /// Numeric code written into the job record
    pub fn code(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ErrorReadGrid => 1,
            ExitCode::ErrorWriteGrid => 2,
            ExitCode::ErrorFileNotFound => 3,
            ExitCode::ExecutionFailed => 6,
            ExitCode::ErrorWriteLocal => 7,
            ExitCode::ErrorGetStd => 8,
            ExitCode::ExecutionCanceled => 9,
            ExitCode::ExecutionStalled => 10,
            ExitCode::Undefined => -1,
        }
    }

    /// Maps the exit value printed by the job wrapper script
    pub fn from_wrapper_exit(value: i32) -> Self {
        match value {
            0 => ExitCode::Success,
            1 => ExitCode::ErrorReadGrid,
            2 => ExitCode::ErrorWriteGrid,
            3 => ExitCode::ErrorFileNotFound,
            6 => ExitCode::ExecutionFailed,
            7 => ExitCode::ErrorWriteLocal,
            _ => ExitCode::Undefined,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::ErrorReadGrid => "ERROR_READ_GRID",
            ExitCode::ErrorWriteGrid => "ERROR_WRITE_GRID",
            ExitCode::ErrorFileNotFound => "ERROR_FILE_NOT_FOUND",
            ExitCode::ExecutionFailed => "EXECUTION_FAILED",
            ExitCode::ErrorWriteLocal => "ERROR_WRITE_LOCAL",
            ExitCode::ErrorGetStd => "ERROR_GET_STD",
            ExitCode::ExecutionCanceled => "EXECUTION_CANCELED",
            ExitCode::ExecutionStalled => "EXECUTION_STALLED",
            ExitCode::Undefined => "UNDEFINED",
        };
        f.write_str(name)
    }
}

/// Canonical record reported when a job finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub job_id: String,
    /// Description document the job was submitted with
    pub document: String,
    pub exit_code: ExitCode,
    pub message: String,
    pub std_out: Option<PathBuf>,
    pub std_err: Option<PathBuf>,
    pub app_std_out: Option<PathBuf>,
    pub app_std_err: Option<PathBuf>,
}

impl CompletionRecord {
    pub fn is_success(&self) -> bool {
        self.exit_code.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_exit_mapping() {
        assert_eq!(ExitCode::from_wrapper_exit(0), ExitCode::Success);
        assert_eq!(ExitCode::from_wrapper_exit(3), ExitCode::ErrorFileNotFound);
        assert_eq!(ExitCode::from_wrapper_exit(7), ExitCode::ErrorWriteLocal);
        assert_eq!(ExitCode::from_wrapper_exit(4), ExitCode::Undefined);
        assert_eq!(ExitCode::from_wrapper_exit(42), ExitCode::Undefined);
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            ExitCode::Success,
            ExitCode::ErrorReadGrid,
            ExitCode::ErrorWriteGrid,
            ExitCode::ErrorFileNotFound,
            ExitCode::ExecutionFailed,
            ExitCode::ErrorWriteLocal,
            ExitCode::ErrorGetStd,
            ExitCode::ExecutionCanceled,
            ExitCode::ExecutionStalled,
            ExitCode::Undefined,
        ];
        let unique: std::collections::HashSet<i32> = codes.iter().map(|c| c.code()).collect();
        assert_eq!(unique.len(), codes.len());
    }
}

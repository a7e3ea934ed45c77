//! Error types for the middleware client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when driving the middleware tools
#[derive(Debug, Error)]
pub enum ClientError {
    /// The tool could not be started at all
    #[error("Failed to execute '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and returned a non-zero exit code
    #[error("'{command}' failed (exit code {exit_code}): {detail}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        /// Captured stderr, or stdout when stderr is empty
        detail: String,
    },

    /// The middleware tools are not installed in the environment
    #[error("Middleware is not available in the environment: {0}")]
    NotInstalled(String),

    /// The tool output did not have the expected shape
    #[error("Failed to parse middleware output: {0}")]
    ParseError(String),

    /// Local filesystem error around a middleware call
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Create a command failure from its exit code and captured streams
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Self {
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            detail: detail.to_string(),
        }
    }

    /// Check if this error means the tools are missing (shell exit 127)
    pub fn is_not_installed(&self) -> bool {
        matches!(self, Self::NotInstalled(_))
            || matches!(self, Self::CommandFailed { exit_code: 127, .. })
    }

    /// Check if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::SpawnFailed { .. } | Self::Io(_)
        ) && !self.is_not_installed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_prefers_stderr() {
        let err = ClientError::command_failed("dirac-wms-job-kill", 2, "out", " boom \n");
        match err {
            ClientError::CommandFailed { detail, .. } => assert_eq!(detail, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = ClientError::command_failed("dirac-wms-job-kill", 2, "only stdout", "");
        assert!(err.to_string().contains("only stdout"));
    }

    #[test]
    fn test_error_predicates() {
        let missing = ClientError::command_failed("dirac-version", 127, "", "not found");
        assert!(missing.is_not_installed());
        assert!(!missing.is_transient());

        let failed = ClientError::command_failed("dirac-wms-job-status", 1, "", "timeout");
        assert!(!failed.is_not_installed());
        assert!(failed.is_transient());

        assert!(!ClientError::ParseError("x".into()).is_transient());
    }
}

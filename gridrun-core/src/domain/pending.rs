//! Pending submission domain type

use serde::{Deserialize, Serialize};

/// A job waiting to be handed to the middleware
///
/// Entries are written before submission and removed once the middleware has
/// accepted the job, so a restart in between does not lose work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingSubmission {
    /// Base name of the job description document
    pub file_name: String,
    pub command: String,
    pub parameters: String,
}

impl PendingSubmission {
    pub fn new(
        file_name: impl Into<String>,
        command: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            command: command.into(),
            parameters: parameters.into(),
        }
    }

    /// File name of the rendered description document
    pub fn document_name(&self) -> String {
        format!("{}.jdl", self.file_name)
    }
}

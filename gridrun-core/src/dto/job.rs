//! Job submission DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment override keys honoured per submission
pub mod env {
    /// Target site
    pub const SITE: &str = "diracSite";
    /// Extra banned site, added to the configured ones
    pub const BANNED_SITE: &str = "diracBannedSite";
    pub const PRIORITY: &str = "diracPriority";
    pub const MAX_CPU_TIME: &str = "diracMaxCPUTime";
    /// Capability tags
    pub const TAGS: &str = "diracTag";
}

/// Request to submit a script to the grid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJob {
    /// Name of the script under the workspace script directory
    pub script_name: String,
    /// Logical command the script runs; fault tracking is scoped by it
    pub command: String,
    pub parameters: Vec<String>,
    /// Per-submission overrides, see [`env`]
    pub env: HashMap<String, String>,
}

impl SubmitJob {
    /// Serialized parameter signature shared by every replica
    pub fn parameter_string(&self) -> String {
        self.parameters
            .iter()
            .map(|p| format!("{} ", p))
            .collect()
    }
}

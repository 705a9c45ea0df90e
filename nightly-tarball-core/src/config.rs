use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Static configuration for one tracked branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Branch name as known to the repository.
    pub name: String,
    /// Storage prefix under which this branch's artifacts, records and
    /// derived listings are published.
    pub output_location: String,
    /// Retention window: how many valid builds to keep.
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Submit a Coverity scan for successful builds of this branch.
    #[serde(default)]
    pub coverity: bool,
    /// Extra storage prefix for projects that still publish to a legacy
    /// location alongside the primary one.
    #[serde(default)]
    pub legacy_output_location: Option<String>,
}

fn default_max_count() -> usize {
    10
}

/// Coverity scan submission settings, shared across branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverityConfig {
    pub tool_url: String,
    pub tool_dir: PathBuf,
    pub token_file: PathBuf,
    pub project_name: String,
    /// Prefix of the directory inside the source tarball
    /// (`<prefix>-<version>`).
    pub project_prefix: String,
    #[serde(default)]
    pub configure_args: Vec<String>,
    #[serde(default)]
    pub make_args: Vec<String>,
    pub email: String,
}

/// Top-level project configuration driving one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-readable project name, used in the summary subject line.
    pub project_name: String,
    /// Short name embedded in record filenames and failed-build tarballs.
    pub project_short_name: String,
    /// Some projects use an even shorter name in their build tooling; falls
    /// back to `project_short_name` when unset.
    #[serde(default)]
    pub project_very_short_name: Option<String>,
    /// Remote repository URL handed to the snapshot provider.
    pub repository: String,
    /// Base of the local build tree; one subdirectory per branch attempt.
    pub scratch_path: PathBuf,
    /// Storage prefix for archived failed-build trees. Unset means failed
    /// builds are not archived.
    #[serde(default)]
    pub failed_build_prefix: Option<String>,
    /// Public URL base matching `failed_build_prefix`, for log messages.
    #[serde(default)]
    pub failed_build_url: Option<String>,
    #[serde(default)]
    pub coverity: Option<CoverityConfig>,
    /// Branches in processing order.
    pub branches: Vec<BranchConfig>,
}

impl ProjectConfig {
    pub fn very_short_name(&self) -> &str {
        self.project_very_short_name
            .as_deref()
            .unwrap_or(&self.project_short_name)
    }

    pub fn trace_loaded(&self) {
        info!(
            project = %self.project_name,
            repository = %self.repository,
            branches = self.branches.len(),
            "Loaded ProjectConfig"
        );
        debug!(?self, "ProjectConfig loaded (full debug)");
    }
}

//! `load_config` module: loads and adapts a static YAML config into the
//! rich core configuration types.
//!
//! This is the only place where untrusted YAML is parsed; it maps
//! loosely-typed YAML keys (e.g. string plan kinds) onto core enums and
//! structs and produces clear diagnostics for the CLI and tests. Secrets
//! (storage credentials) are never read from the file; they come from the
//! environment when the storage client is constructed.

use anyhow::Result;
use nightly_tarball_core::config::{BranchConfig, CoverityConfig, ProjectConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Which storage backend to publish to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreSection {
    /// Directory-backed store, mainly for local runs and testing.
    Local { base: PathBuf },
    /// Remote object-store gateway; URL and token come from the
    /// environment (`ARTIFACT_STORE_URL`, `ARTIFACT_STORE_TOKEN`).
    Http,
}

/// Which build plan drives the project.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanSection {
    /// Conventional autotools packaging, optionally via a project helper
    /// script.
    Default {
        #[serde(default)]
        tarball_builder: Option<Vec<String>>,
    },
    /// VERSION-file stamping with a toolchain wrapper script and legacy
    /// dual-publish support.
    VersionFile {
        #[serde(default)]
        wrapper: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub project_name: String,
    pub project_short_name: String,
    #[serde(default)]
    pub project_very_short_name: Option<String>,
    pub repository: String,
    pub scratch_path: PathBuf,
    #[serde(default)]
    pub failed_build_prefix: Option<String>,
    #[serde(default)]
    pub failed_build_url: Option<String>,
    #[serde(default)]
    pub coverity: Option<CoverityConfig>,
    pub branches: Vec<BranchConfig>,
    pub store: StoreSection,
    pub plan: PlanSection,
}

impl CliConfig {
    /// Project the CLI-level config down to the core's domain config.
    pub fn to_project_config(&self) -> ProjectConfig {
        ProjectConfig {
            project_name: self.project_name.clone(),
            project_short_name: self.project_short_name.clone(),
            project_very_short_name: self.project_very_short_name.clone(),
            repository: self.repository.clone(),
            scratch_path: expand_vars(&self.scratch_path),
            failed_build_prefix: self.failed_build_prefix.clone(),
            failed_build_url: self.failed_build_url.clone(),
            coverity: self.coverity.clone(),
            branches: self.branches.clone(),
        }
    }
}

/// Expand `${VAR}` references in a configured path, so configs can say
/// `${TMPDIR}/nightly` without caring where the deployment scratch lives.
fn expand_vars(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let mut expanded = raw.to_string();
    while let Some(start) = expanded.find("${") {
        let Some(rel_end) = expanded[start..].find('}') else {
            break;
        };
        let end = start + rel_end;
        let var = &expanded[start + 2..end];
        let value = std::env::var(var).unwrap_or_default();
        expanded = format!("{}{}{}", &expanded[..start], value, &expanded[end + 1..]);
    }
    PathBuf::from(expanded)
}

/// Load a static YAML config file. Secrets are injected later from the
/// environment, not parsed here.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.branches.is_empty() {
        return Err(anyhow::anyhow!("config declares no branches to build"));
    }

    Ok(config)
}

//! Per-project build strategy.
//!
//! Projects differ in how they stamp a version into the source tree, how
//! they produce the tarball, and whether they publish anywhere beyond the
//! primary output location. Those three variation points are captured by
//! the [`BuildPlan`] trait, and a concrete plan is selected at
//! configuration time. Everything else in the pipeline is common.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::builder::CurrentBuild;
use crate::config::BranchConfig;
use crate::contract::{Filer, FilerError};
use crate::runner::{logged_call, CallOptions, RunnerError};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("version stamping failed: {0}")]
    Version(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Filer(#[from] FilerError),
}

/// The pluggable build-step operations, invoked in order by the
/// orchestrator for each non-skipped branch attempt.
///
/// All operations receive the working context explicitly; none may rely on
/// the process-wide current directory.
#[async_trait]
pub trait BuildPlan: Send + Sync {
    /// Stamp the computed version into the source tree before the build,
    /// if the project needs it. Runs after the snapshot, before the build.
    async fn prepare_version(&self, build: &CurrentBuild) -> Result<(), PlanError>;

    /// Produce the distributable artifacts in the source tree.
    async fn run_build(&self, build: &CurrentBuild) -> Result<(), PlanError>;

    /// Extra publishing after the primary artifacts, record and latest
    /// pointer are uploaded. Default is nothing.
    async fn publish_extra(
        &self,
        _filer: &dyn Filer,
        _branch_cfg: &BranchConfig,
        _build: &CurrentBuild,
    ) -> Result<(), PlanError> {
        Ok(())
    }
}

/// Plan for projects with conventional autotools packaging.
///
/// Uses the configured tarball-builder command when present, otherwise
/// `autoreconf -if; ./configure; make distcheck`. No version-file rewrite:
/// the version string only appears in the latest pointer and record names.
pub struct DefaultPlan {
    /// Full argv of a project helper script that builds the tarball.
    pub tarball_builder: Option<Vec<String>>,
}

impl DefaultPlan {
    pub fn new(tarball_builder: Option<Vec<String>>) -> Self {
        Self { tarball_builder }
    }
}

#[async_trait]
impl BuildPlan for DefaultPlan {
    async fn prepare_version(&self, _build: &CurrentBuild) -> Result<(), PlanError> {
        Ok(())
    }

    async fn run_build(&self, build: &CurrentBuild) -> Result<(), PlanError> {
        let source_tree = &build.source_tree;
        match &self.tarball_builder {
            Some(args) => {
                logged_call(args, source_tree, build.call_options(None))?;
            }
            None => {
                for step in [
                    vec!["autoreconf".to_string(), "-if".to_string()],
                    vec!["./configure".to_string()],
                    vec!["make".to_string(), "distcheck".to_string()],
                ] {
                    logged_call(&step, source_tree, build.call_options(None))?;
                }
            }
        }
        Ok(())
    }
}

/// Plan for projects that stamp the version into a `VERSION` file and still
/// publish to a legacy location alongside the primary one.
///
/// The build runs with `USER` overridden to `<very_short_name>builder` (so
/// project tooling keyed on the username behaves) and `LD_LIBRARY_PATH`
/// cleared for distcheck, and every build step goes through the configured
/// wrapper script that sets up the toolchain environment.
pub struct VersionFilePlan {
    /// Shorter project name used for the `USER` override.
    pub very_short_name: String,
    /// Wrapper argv prepended to each build step, e.g.
    /// `["run-with-autotools.sh", "autotools/<proj>-<branch>"]`.
    pub wrapper_args: Vec<String>,
}

impl VersionFilePlan {
    pub fn new(very_short_name: &str, wrapper_args: Vec<String>) -> Self {
        Self {
            very_short_name: very_short_name.to_string(),
            wrapper_args,
        }
    }

    fn build_env(&self, clear_ld_path: bool) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert("USER".to_string(), format!("{}builder", self.very_short_name));
        if clear_ld_path {
            // distcheck must not pick up other installs via the library
            // path; cleaning it entirely has been sufficient so far.
            env.insert("LD_LIBRARY_PATH".to_string(), String::new());
        }
        env
    }
}

/// Rewrite `tarball_version=` and `repo_rev=` assignments in a VERSION
/// file, leaving every other line untouched.
fn rewrite_version_file(
    version_file: &Path,
    version_string: &str,
    revision: &str,
) -> Result<(), PlanError> {
    let contents = fs::read_to_string(version_file).map_err(|e| {
        PlanError::Version(format!(
            "cannot read {}: {e}",
            version_file.display()
        ))
    })?;
    let mut rewritten = String::with_capacity(contents.len());
    for line in contents.lines() {
        if line.starts_with("tarball_version=") {
            rewritten.push_str(&format!("tarball_version={version_string}"));
        } else if line.starts_with("repo_rev=") {
            rewritten.push_str(&format!("repo_rev={revision}"));
        } else {
            rewritten.push_str(line);
        }
        rewritten.push('\n');
    }
    fs::write(version_file, rewritten)?;
    Ok(())
}

#[async_trait]
impl BuildPlan for VersionFilePlan {
    async fn prepare_version(&self, build: &CurrentBuild) -> Result<(), PlanError> {
        let version_file = build.source_tree.join("VERSION");
        debug!(version_string = %build.version_string, "stamping VERSION file");
        rewrite_version_file(&version_file, &build.version_string, &build.revision)
    }

    async fn run_build(&self, build: &CurrentBuild) -> Result<(), PlanError> {
        let source_tree = &build.source_tree;
        let wrapper = self.wrapper_args.clone();

        let autogen = vec!["./autogen.pl".to_string()];
        let mut opts = build.call_options(Some("autogen".to_string()));
        opts.wrapper_args = wrapper.clone();
        opts.env = Some(self.build_env(false));
        logged_call(&autogen, source_tree, opts)?;

        let configure = vec!["./configure".to_string()];
        let mut opts = build.call_options(Some("configure".to_string()));
        opts.wrapper_args = wrapper.clone();
        opts.env = Some(self.build_env(false));
        logged_call(&configure, source_tree, opts)?;

        let distcheck = vec!["make".to_string(), "distcheck".to_string()];
        let mut opts = build.call_options(Some("distcheck".to_string()));
        opts.wrapper_args = wrapper;
        opts.env = Some(self.build_env(true));
        logged_call(&distcheck, source_tree, opts)?;
        Ok(())
    }

    async fn publish_extra(
        &self,
        filer: &dyn Filer,
        branch_cfg: &BranchConfig,
        build: &CurrentBuild,
    ) -> Result<(), PlanError> {
        let Some(legacy) = &branch_cfg.legacy_output_location else {
            return Ok(());
        };
        info!(branch = %branch_cfg.name, legacy, "publishing to legacy location");
        for name in build.artifacts.keys() {
            let local = build.source_tree.join(name);
            let remote = format!("{}/{}", legacy.trim_end_matches('/'), name);
            if let Err(e) = filer.upload_file(&local, &remote).await {
                warn!(error = %e, remote, "legacy publish failed");
                return Err(e.into());
            }
        }
        let latest = format!("{}/latest_snapshot.txt", legacy.trim_end_matches('/'));
        filer
            .upload(
                &latest,
                format!("{}\n", build.version_string).as_bytes(),
                Some("max-age=600"),
            )
            .await?;
        Ok(())
    }
}

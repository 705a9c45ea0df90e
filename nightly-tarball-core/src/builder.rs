//! The build orchestrator: one build-and-publish cycle per configured
//! branch.
//!
//! A note on the paths used here:
//!
//! - `config.scratch_path`: `<scratch>`
//! - project path: `<scratch>/<project_short_name>`
//! - `CurrentBuild.build_root`: `<scratch>/<project_short_name>/<branch>-<build_time>/`
//! - `CurrentBuild.source_tree`: `<scratch>/<project_short_name>/<branch>-<build_time>/<repo>`
//!
//! Branches are processed strictly sequentially; each branch's working
//! state is independent and deleted before the next branch starts. A
//! branch-local failure is converted into a FAILED outcome at this
//! boundary; only systemic failures (scratch space cannot be created) stop
//! the remaining branches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::try_join_all;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{BranchConfig, ProjectConfig};
use crate::contract::{Filer, FilerError, SnapshotError, Snapshotter};
use crate::coverity;
use crate::digest::compute_digests;
use crate::history::{format_build_time, ArtifactDigest, BuildHistory, BuildRecord, HistoryStore};
use crate::notify::BuildReport;
use crate::plan::{BuildPlan, PlanError};
use crate::retention::run_retention;
use crate::runner::CallOptions;

/// Classification of one branch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Failed,
    Skipped,
}

/// Ephemeral working state for one branch attempt. Owned exclusively by
/// the orchestrator and discarded (with its working tree) when the attempt
/// ends, whatever the outcome.
#[derive(Debug, Clone)]
pub struct CurrentBuild {
    pub branch_name: String,
    pub build_unix_time: i64,
    /// `build_unix_time` formatted as `YYYYMMDDHHMM` UTC.
    pub build_time: String,
    pub build_root: PathBuf,
    pub source_tree: PathBuf,
    pub revision: String,
    /// Human-readable version embedded into the release and the latest
    /// pointer: `<branch>-<build_time>-<revision>`.
    pub version_string: String,
    pub artifacts: BTreeMap<String, ArtifactDigest>,
}

impl CurrentBuild {
    /// Call options for a build step, logging into the build root.
    pub fn call_options(&self, log_name: Option<String>) -> CallOptions {
        CallOptions {
            log_file: log_name.map(|name| self.build_root.join(format!("{name}-output.txt"))),
            ..Default::default()
        }
    }
}

/// Systemic failures: these halt processing of subsequent branches.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("cannot create scratch space at {path}: {source}")]
    Scratch {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Branch-local failures, converted to a FAILED outcome at the per-branch
/// boundary.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Filer(#[from] FilerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Build one or more branches of a repository and publish the results.
///
/// The storage backend and snapshot provider are injected; the per-project
/// build behavior is a [`BuildPlan`] selected at configuration time.
pub struct Builder<F: Filer, S: Snapshotter> {
    config: ProjectConfig,
    filer: F,
    snapshotter: S,
    plan: Box<dyn BuildPlan>,
}

impl<F: Filer, S: Snapshotter> Builder<F, S> {
    pub fn new(config: ProjectConfig, filer: F, snapshotter: S, plan: Box<dyn BuildPlan>) -> Self {
        Self {
            config,
            filer,
            snapshotter,
            plan,
        }
    }

    pub fn filer(&self) -> &F {
        &self.filer
    }

    fn project_path(&self) -> PathBuf {
        self.config
            .scratch_path
            .join(&self.config.project_short_name)
    }

    /// Execute every configured branch build and aggregate the outcomes.
    ///
    /// A systemic error stops further branches (the failing branch is
    /// reported FAILED); everything already started has been cleaned up by
    /// `run_single_build` itself.
    pub async fn run(&self) -> BuildReport {
        let names: Vec<&str> = self.config.branches.iter().map(|b| b.name.as_str()).collect();
        info!(branches = ?names, "starting build run");

        let mut report = BuildReport::new(&self.config.project_name);
        for branch_cfg in &self.config.branches {
            match self.run_single_build(branch_cfg).await {
                Ok(BuildOutcome::Success) => report.success.push(branch_cfg.name.clone()),
                Ok(BuildOutcome::Failed) => report.failed.push(branch_cfg.name.clone()),
                Ok(BuildOutcome::Skipped) => report.skipped.push(branch_cfg.name.clone()),
                Err(e) => {
                    error!(branch = %branch_cfg.name, error = %e, "systemic failure, stopping run");
                    report.failed.push(branch_cfg.name.clone());
                    break;
                }
            }
        }
        info!(
            success = ?report.success,
            skipped = ?report.skipped,
            failed = ?report.failed,
            "build run complete"
        );
        report
    }

    /// Run one branch attempt end to end: snapshot, build decision,
    /// publish, failure archival, cleanup and retention.
    ///
    /// Only systemic failures surface as `Err`; everything branch-local is
    /// folded into the returned outcome.
    pub async fn run_single_build(
        &self,
        branch_cfg: &BranchConfig,
    ) -> Result<BuildOutcome, BuilderError> {
        info!(branch = %branch_cfg.name, "starting build");

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let build_time = format_build_time(now);
        let build_root = self
            .project_path()
            .join(format!("{}-{}", branch_cfg.name, build_time));
        let repo_basename = Path::new(&self.config.repository)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.project_short_name.clone());
        let source_tree = build_root.join(repo_basename);

        // The one failure mode that must stop the whole run: we cannot even
        // create scratch space.
        fs::create_dir_all(&build_root).map_err(|e| BuilderError::Scratch {
            path: build_root.clone(),
            source: e,
        })?;

        let mut current = CurrentBuild {
            branch_name: branch_cfg.name.clone(),
            build_unix_time: now,
            build_time,
            build_root,
            source_tree,
            revision: String::new(),
            version_string: String::new(),
            artifacts: BTreeMap::new(),
        };

        let store = HistoryStore::new(&self.filer, &self.config.project_short_name);
        let mut history: Option<BuildHistory> = None;

        let outcome = match self.attempt(branch_cfg, &mut current, &store, &mut history).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(branch = %branch_cfg.name, error = %e, "FAILURE");
                if let Err(archive_err) = self.publish_failed_build(&current).await {
                    warn!(error = %archive_err, "failed-build archival did not complete");
                }
                BuildOutcome::Failed
            }
        };

        self.cleanup(&current.build_root);

        if let Some(history) = history.as_mut() {
            if let Err(e) =
                run_retention(&self.filer, &store, branch_cfg, history, now).await
            {
                error!(branch = %branch_cfg.name, error = %e, "retention pass failed");
            }
        }

        Ok(outcome)
    }

    /// The guarded portion of a branch attempt: everything in here maps a
    /// failure to a FAILED outcome.
    async fn attempt(
        &self,
        branch_cfg: &BranchConfig,
        current: &mut CurrentBuild,
        store: &HistoryStore<'_, F>,
        history_out: &mut Option<BuildHistory>,
    ) -> Result<BuildOutcome, AttemptError> {
        let snapshot = self
            .snapshotter
            .snapshot(&self.config.repository, &branch_cfg.name, &current.source_tree)
            .await?;
        current.revision = snapshot.revision;
        current.version_string = format!(
            "{}-{}-{}",
            current.branch_name, current.build_time, current.revision
        );

        let history = store.load(branch_cfg).await?;
        let last_version = history
            .values()
            .next_back()
            .map(|record| record.revision.clone())
            .unwrap_or_default();
        *history_out = Some(history);

        // An empty revision means "always rebuild"; never skip on it.
        if !current.revision.is_empty() && current.revision == last_version {
            info!(
                revision = %current.revision,
                "build for revision already exists, skipping"
            );
            return Ok(BuildOutcome::Skipped);
        }
        info!(revision = %current.revision, "found new revision");

        self.plan.prepare_version(current).await?;
        self.plan.run_build(current).await?;
        self.find_build_artifacts(current)?;

        if branch_cfg.coverity && !current.artifacts.is_empty() {
            if let Some(cov_config) = &self.config.coverity {
                let first = current
                    .artifacts
                    .keys()
                    .next()
                    .map(|name| current.source_tree.join(name));
                if let Some(tarball) = first {
                    match coverity::run_coverity(&current.build_root, &tarball, cov_config).await
                    {
                        Ok(()) => info!("successfully submitted scan build"),
                        Err(e) => error!(error = %e, "scan submission failed"),
                    }
                }
            }
        }

        self.publish_build_artifacts(branch_cfg, current, store, history_out)
            .await?;
        self.plan
            .publish_extra(&self.filer, branch_cfg, current)
            .await?;

        info!(
            branch = %branch_cfg.name,
            revision = %current.revision,
            "build completed successfully"
        );
        Ok(BuildOutcome::Success)
    }

    /// Discover produced artifacts: archive files in the top level of the
    /// source tree, digested and sized. No dedup by content; two identical
    /// files under different names stay distinct entries.
    fn find_build_artifacts(&self, current: &mut CurrentBuild) -> Result<(), AttemptError> {
        current.artifacts.clear();
        for entry in fs::read_dir(&current.source_tree)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.ends_with(".tar.gz") || name.ends_with(".tar.bz2")) {
                continue;
            }
            let digest = compute_digests(&entry.path())?;
            debug!(
                file = %name,
                size = digest.size,
                md5 = %digest.md5,
                sha1 = %digest.sha1,
                "found artifact"
            );
            current.artifacts.insert(name, digest);
        }
        Ok(())
    }

    /// Publish artifacts, then the build record, then the latest pointer.
    ///
    /// Every artifact is fully uploaded before the record referencing it is
    /// written; a crash in between leaves an orphaned artifact, never a
    /// dangling record.
    async fn publish_build_artifacts(
        &self,
        branch_cfg: &BranchConfig,
        current: &CurrentBuild,
        store: &HistoryStore<'_, F>,
        history_out: &mut Option<BuildHistory>,
    ) -> Result<(), AttemptError> {
        let output_base = branch_cfg.output_location.trim_end_matches('/');

        let uploads = current.artifacts.keys().map(|name| {
            let local = current.source_tree.join(name);
            let remote = format!("{output_base}/{name}");
            debug!(file = %name, remote = %remote, "publishing file");
            async move { self.filer.upload_file(&local, &remote).await }
        });
        try_join_all(uploads).await?;

        let record = BuildRecord {
            branch: current.branch_name.clone(),
            valid: true,
            revision: current.revision.clone(),
            build_unix_time: current.build_unix_time,
            delete_on: 0,
            files: current.artifacts.clone(),
        };
        store.save(branch_cfg, &record).await?;
        if let Some(history) = history_out.as_mut() {
            history.insert(record.build_unix_time, record);
        }

        let latest_key = format!("{output_base}/latest_snapshot.txt");
        self.filer
            .upload(
                &latest_key,
                format!("{}\n", current.version_string).as_bytes(),
                Some("max-age=600"),
            )
            .await?;
        Ok(())
    }

    /// Archive the whole working tree of a failed build for postmortem.
    ///
    /// Best effort: a missing failed-build prefix is a warning and a no-op,
    /// and callers log rather than propagate any error from here.
    async fn publish_failed_build(&self, current: &CurrentBuild) -> Result<(), AttemptError> {
        let Some(prefix) = &self.config.failed_build_prefix else {
            warn!("failed_build_prefix not set in config; not saving failed build info");
            return Ok(());
        };

        debug!(branch = %current.branch_name, "publishing failed build");
        let failed_tarball_name = format!(
            "{}-{}-{}-failed.tar.gz",
            self.config.project_short_name, current.branch_name, current.build_time
        );
        let failed_tarball_path = self.project_path().join(&failed_tarball_name);

        archive_dir(&current.build_root, &failed_tarball_path)?;

        let remote = format!("{}/{}", prefix.trim_end_matches('/'), failed_tarball_name);
        self.filer
            .upload_file(&failed_tarball_path, &remote)
            .await?;
        fs::remove_file(&failed_tarball_path)?;

        if let Some(url_base) = &self.config.failed_build_url {
            warn!("build artifacts available at: {url_base}{remote}");
        }
        Ok(())
    }

    /// Delete the branch working tree. Build tools can leave read-only
    /// entries behind ("make distcheck"), so everything is forced writable
    /// first; per-entry chmod errors are ignored so one dangling symlink
    /// does not strand the rest of the tree.
    fn cleanup(&self, build_root: &Path) {
        debug!(path = %build_root.display(), "deleting build tree");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for entry in WalkDir::new(build_root).into_iter().flatten() {
                let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o700));
            }
        }
        if let Err(e) = fs::remove_dir_all(build_root) {
            warn!(path = %build_root.display(), error = %e, "could not delete build tree");
        }
    }
}

/// Create a gzipped tarball of `dir`'s contents at `dest`.
fn archive_dir(dir: &Path, dest: &Path) -> std::io::Result<()> {
    let tar_gz = fs::File::create(dest)?;
    let encoder = flate2::write::GzEncoder::new(tar_gz, flate2::Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.append_dir_all(".", dir)?;
    archive.into_inner()?.finish()?;
    Ok(())
}

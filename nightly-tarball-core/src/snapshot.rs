//! Git-backed [`Snapshotter`] implementation.
//!
//! Produces the working copy by shelling out to `git`: clone, create a
//! local branch tracking `origin/<branch>`, update submodules recursively,
//! then report the short head revision.

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::contract::{Snapshot, SnapshotError, Snapshotter};

pub struct GitSnapshotter;

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<std::process::Output, SnapshotError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(args = ?args, cwd = ?cwd, "running git");
    let output = cmd.output().map_err(|e| SnapshotError::Spawn {
        command: format!("git {}", args.join(" ")),
        source: e,
    })?;
    if !output.status.success() {
        return Err(SnapshotError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            status: output.status.to_string(),
        });
    }
    Ok(output)
}

#[async_trait]
impl Snapshotter for GitSnapshotter {
    async fn snapshot(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
    ) -> Result<Snapshot, SnapshotError> {
        debug!(url, branch, dest = %dest.display(), "cloning repository");
        run_git(&["clone", url, &dest.to_string_lossy()], None)?;

        // Materialize the branch head as a local branch; a plain checkout
        // would leave a detached HEAD for branches other than the default.
        debug!(branch, "switching to branch");
        run_git(
            &["checkout", "-B", branch, &format!("origin/{branch}")],
            Some(dest),
        )?;

        run_git(
            &["submodule", "update", "--init", "--recursive"],
            Some(dest),
        )?;

        let output = run_git(&["rev-parse", "--short=7", "HEAD"], Some(dest))?;
        let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(url, branch, revision, "snapshot complete");
        Ok(Snapshot { revision })
    }
}

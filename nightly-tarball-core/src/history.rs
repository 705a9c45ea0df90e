//! Durable per-branch build history, layered on the [`Filer`].
//!
//! Each completed build is one JSON object in remote storage, named by a
//! deterministic convention shared with the web pages that consume the
//! output: `build-<project>-<branch>-<YYYYMMDDHHMM>-<revision>.json` under
//! the branch's output location. History is always read fresh from storage
//! at the start of a pass; nothing is cached across branches or runs.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BranchConfig;
use crate::contract::{Filer, FilerError};

/// Content hashes and size for one published artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    pub md5: String,
    pub sha1: String,
    /// Not present in records written by older tooling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub size: u64,
}

/// Persisted metadata for one build of one branch.
///
/// `files` is immutable once published; corrections require a new record.
/// A record with `valid == false` and `delete_on == 0` is transient: the
/// next retention pass assigns its `delete_on` before any reader treats it
/// as fully expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub branch: String,
    pub valid: bool,
    /// Empty string signals "always rebuild".
    pub revision: String,
    pub build_unix_time: i64,
    /// Unix timestamp after which artifacts may be purged; 0 means no
    /// expiry scheduled yet.
    pub delete_on: i64,
    pub files: BTreeMap<String, ArtifactDigest>,
}

/// Build histories are keyed by build time, so iteration order is oldest
/// first and the newest entry is simply the last.
pub type BuildHistory = BTreeMap<i64, BuildRecord>;

/// Format a unix timestamp as the `YYYYMMDDHHMM` UTC string used in record
/// filenames and version strings.
pub fn format_build_time(build_unix_time: i64) -> String {
    Utc.timestamp_opt(build_unix_time, 0)
        .single()
        .map(|t| t.format("%Y%m%d%H%M").to_string())
        .unwrap_or_else(|| build_unix_time.to_string())
}

/// Deterministic storage key for one build record. Stable for a given
/// (project, branch, time, revision), so republishing overwrites rather
/// than duplicates.
pub fn record_key(
    output_location: &str,
    project_short_name: &str,
    branch: &str,
    build_unix_time: i64,
    revision: &str,
) -> String {
    format!(
        "{}/build-{}-{}-{}-{}.json",
        output_location.trim_end_matches('/'),
        project_short_name,
        branch,
        format_build_time(build_unix_time),
        revision
    )
}

/// Load/save layer for [`BuildRecord`]s of one project.
pub struct HistoryStore<'a, F: Filer> {
    filer: &'a F,
    project_short_name: String,
}

impl<'a, F: Filer> HistoryStore<'a, F> {
    pub fn new(filer: &'a F, project_short_name: &str) -> Self {
        Self {
            filer,
            project_short_name: project_short_name.to_string(),
        }
    }

    pub fn record_key(&self, branch_cfg: &BranchConfig, record: &BuildRecord) -> String {
        record_key(
            &branch_cfg.output_location,
            &self.project_short_name,
            &record.branch,
            record.build_unix_time,
            &record.revision,
        )
    }

    /// Scan the branch output prefix for build records and return them
    /// keyed by build time.
    ///
    /// Records missing required fields are silently skipped; records that
    /// fail to parse are dropped with a warning. One corrupt history entry
    /// must not block the orchestrator. Entries whose embedded branch does
    /// not match are ignored (defense against prefix collisions).
    pub async fn load(&self, branch_cfg: &BranchConfig) -> Result<BuildHistory, FilerError> {
        let keys = self
            .filer
            .search(&branch_cfg.output_location, "build-*.json")
            .await?;
        let mut history = BuildHistory::new();
        for key in keys {
            debug!(key, "looking at data file");
            let bytes = self.filer.download(&key).await?;
            let value: serde_json::Value = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key, error = %e, "dropping unparseable build record");
                    continue;
                }
            };
            if value.get("build_unix_time").is_none() || value.get("branch").is_none() {
                continue;
            }
            let record: BuildRecord = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(key, error = %e, "dropping malformed build record");
                    continue;
                }
            };
            if record.branch == branch_cfg.name {
                history.insert(record.build_unix_time, record);
            }
        }
        Ok(history)
    }

    /// Serialize and write one record back under its deterministic key.
    pub async fn save(
        &self,
        branch_cfg: &BranchConfig,
        record: &BuildRecord,
    ) -> Result<(), FilerError> {
        let key = self.record_key(branch_cfg, record);
        let data = serde_json::to_vec(record)
            .map_err(|e| FilerError::Backend(format!("serializing record {key}: {e}")))?;
        self.filer
            .upload(&key, &data, Some("max-age=600"))
            .await
    }

    /// Delete one record object (not its artifacts; see retention).
    pub async fn delete(
        &self,
        branch_cfg: &BranchConfig,
        record: &BuildRecord,
    ) -> Result<(), FilerError> {
        let key = self.record_key(branch_cfg, record);
        self.filer.delete(&key).await
    }
}

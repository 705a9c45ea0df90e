//! Retention policy and expiry sweep for remote build history.
//!
//! Deletion is a two-phase process. First, when a branch has more than
//! `max_count` builds, the oldest surplus builds still marked valid are
//! expired: `valid` flips to false and `delete_on` is set one full day out,
//! so consumers that cached the old "latest" pointer keep working during
//! the grace window. Second, builds whose `delete_on` has passed are
//! actually removed from storage: every listed artifact first, then the
//! record object, so a crash mid-delete leaves the record as the last
//! recoverable trace rather than metadata pointing at nothing.
//!
//! The consolidated checksum listings are derived state, rebuilt from the
//! surviving valid records on every pass.

use tracing::debug;

use crate::config::BranchConfig;
use crate::contract::{Filer, FilerError};
use crate::history::{BuildHistory, HistoryStore};

/// Grace period between expiry and deletion.
pub const EXPIRY_GRACE_SECS: i64 = 24 * 60 * 60;

/// Enforce `max_count` and sweep expired builds for one branch, then
/// regenerate the branch checksum listings.
///
/// Invalid builds count against `max_count` too; unless records arrive out
/// of order the effect is identical and the bookkeeping is much simpler.
/// There is no locking against concurrent runs — the worst case is a few
/// too many valid builds until the next pass reconciles it.
pub async fn run_retention<F: Filer>(
    filer: &F,
    store: &HistoryStore<'_, F>,
    branch_cfg: &BranchConfig,
    history: &mut BuildHistory,
    now: i64,
) -> Result<(), FilerError> {
    // Phase 1: expire the oldest builds beyond the retention window.
    let build_times: Vec<i64> = history.keys().copied().collect();
    if build_times.len() > branch_cfg.max_count {
        let surplus = &build_times[..build_times.len() - branch_cfg.max_count];
        for key in surplus {
            let snapshot = match history.get_mut(key) {
                Some(record) if record.valid => {
                    record.valid = false;
                    record.delete_on = now + EXPIRY_GRACE_SECS;
                    record.clone()
                }
                _ => continue,
            };
            debug!(branch = %branch_cfg.name, build = key, "expiring build");
            store.save(branch_cfg, &snapshot).await?;
        }
    }

    // Phase 2: delete builds whose grace period has passed. Files before
    // metadata, so the record outlives its artifacts if we crash here.
    let expired: Vec<i64> = history
        .iter()
        .filter(|(_, r)| r.delete_on != 0 && r.delete_on < now)
        .map(|(k, _)| *k)
        .collect();
    for key in expired {
        let Some(record) = history.remove(&key) else {
            continue;
        };
        debug!(branch = %branch_cfg.name, build = key, "removing build");
        for name in record.files.keys() {
            let pathname = format!(
                "{}/{}",
                branch_cfg.output_location.trim_end_matches('/'),
                name
            );
            debug!(%pathname, "removing file");
            filer.delete(&pathname).await?;
        }
        store.delete(branch_cfg, &record).await?;
    }

    // Regenerate md5sums.txt / sha1sums.txt for all valid builds. Done
    // here rather than at publish time so the listings shrink whenever
    // builds go invalid or are removed, not just when new builds appear.
    let mut md5sums = String::new();
    let mut sha1sums = String::new();
    for record in history.values() {
        if !record.valid {
            continue;
        }
        for (filename, digest) in &record.files {
            md5sums.push_str(&format!("{} {}\n", digest.md5, filename));
            sha1sums.push_str(&format!("{} {}\n", digest.sha1, filename));
        }
    }
    let output_base = branch_cfg.output_location.trim_end_matches('/');
    filer
        .upload(&format!("{output_base}/md5sums.txt"), md5sums.as_bytes(), None)
        .await?;
    filer
        .upload(
            &format!("{output_base}/sha1sums.txt"),
            sha1sums.as_bytes(),
            None,
        )
        .await?;
    Ok(())
}

use std::collections::BTreeMap;

use nightly_tarball_core::config::BranchConfig;
use nightly_tarball_core::contract::Filer;
use nightly_tarball_core::filer::LocalFiler;
use nightly_tarball_core::history::{ArtifactDigest, BuildRecord, HistoryStore};
use nightly_tarball_core::retention::{run_retention, EXPIRY_GRACE_SECS};
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000;

fn branch_cfg(max_count: usize) -> BranchConfig {
    BranchConfig {
        name: "main".to_string(),
        output_location: "nightly/main".to_string(),
        max_count,
        coverity: false,
        legacy_output_location: None,
    }
}

fn record(build_unix_time: i64, revision: &str) -> BuildRecord {
    let mut files = BTreeMap::new();
    files.insert(
        format!("proj-{revision}.tar.gz"),
        ArtifactDigest {
            md5: format!("md5-{revision}"),
            sha1: format!("sha1-{revision}"),
            sha256: None,
            size: 100,
        },
    );
    BuildRecord {
        branch: "main".to_string(),
        valid: true,
        revision: revision.to_string(),
        build_unix_time,
        delete_on: 0,
        files,
    }
}

/// Publish `count` valid builds (records plus artifact objects) spaced a
/// day apart, oldest first, and return the loaded history.
async fn seed_builds(
    filer: &LocalFiler,
    store: &HistoryStore<'_, LocalFiler>,
    cfg: &BranchConfig,
    count: usize,
) -> nightly_tarball_core::history::BuildHistory {
    for i in 0..count {
        let rec = record(NOW - 86_400 * (count - i) as i64, &format!("rev{i:02}"));
        for name in rec.files.keys() {
            filer
                .upload(&format!("{}/{}", cfg.output_location, name), b"bytes", None)
                .await
                .unwrap();
        }
        store.save(cfg, &rec).await.unwrap();
    }
    store.load(cfg).await.unwrap()
}

#[tokio::test]
async fn surplus_builds_expire_with_one_day_grace() {
    let dir = tempdir().unwrap();
    let filer = LocalFiler::new(dir.path());
    let store = HistoryStore::new(&filer, "proj");
    let cfg = branch_cfg(10);

    let mut history = seed_builds(&filer, &store, &cfg, 12).await;
    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .expect("retention should succeed");

    let expired: Vec<&BuildRecord> = history.values().filter(|r| !r.valid).collect();
    assert_eq!(expired.len(), 2, "exactly the two oldest expire");
    for rec in &expired {
        assert_eq!(rec.delete_on, NOW + EXPIRY_GRACE_SECS);
    }
    // The two oldest by build time are the expired ones.
    let oldest: Vec<i64> = history.keys().take(2).copied().collect();
    for key in oldest {
        assert!(!history[&key].valid);
    }
    assert_eq!(history.values().filter(|r| r.valid).count(), 10);

    // The expiry was persisted, not just applied in memory.
    let reloaded = store.load(&cfg).await.unwrap();
    assert_eq!(reloaded.values().filter(|r| !r.valid).count(), 2);

    // Listings cover only the 10 surviving valid builds.
    let md5sums = String::from_utf8(filer.download("nightly/main/md5sums.txt").await.unwrap())
        .unwrap();
    assert_eq!(md5sums.lines().count(), 10);
    assert!(!md5sums.contains("md5-rev00"));
    assert!(!md5sums.contains("md5-rev01"));
    assert!(md5sums.contains("md5-rev02"));
}

#[tokio::test]
async fn retention_is_idempotent_without_new_builds() {
    let dir = tempdir().unwrap();
    let filer = LocalFiler::new(dir.path());
    let store = HistoryStore::new(&filer, "proj");
    let cfg = branch_cfg(10);

    let mut history = seed_builds(&filer, &store, &cfg, 12).await;
    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .unwrap();

    let valid_after_first: Vec<(i64, bool, i64)> = history
        .values()
        .map(|r| (r.build_unix_time, r.valid, r.delete_on))
        .collect();
    let md5_first = filer.download("nightly/main/md5sums.txt").await.unwrap();
    let sha1_first = filer.download("nightly/main/sha1sums.txt").await.unwrap();

    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .unwrap();

    let valid_after_second: Vec<(i64, bool, i64)> = history
        .values()
        .map(|r| (r.build_unix_time, r.valid, r.delete_on))
        .collect();
    assert_eq!(valid_after_first, valid_after_second);
    assert_eq!(
        md5_first,
        filer.download("nightly/main/md5sums.txt").await.unwrap()
    );
    assert_eq!(
        sha1_first,
        filer.download("nightly/main/sha1sums.txt").await.unwrap()
    );
}

#[tokio::test]
async fn expiry_is_monotonic_across_passes() {
    let dir = tempdir().unwrap();
    let filer = LocalFiler::new(dir.path());
    let store = HistoryStore::new(&filer, "proj");
    let cfg = branch_cfg(2);

    let mut history = seed_builds(&filer, &store, &cfg, 3).await;
    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .unwrap();
    let expired_key = *history
        .iter()
        .find(|(_, r)| !r.valid)
        .map(|(k, _)| k)
        .expect("one record expired");
    let first_delete_on = history[&expired_key].delete_on;

    // A later pass must neither revive the record nor push its deletion
    // further out.
    run_retention(&filer, &store, &cfg, &mut history, NOW + 100)
        .await
        .unwrap();
    assert!(!history[&expired_key].valid);
    assert_eq!(history[&expired_key].delete_on, first_delete_on);
}

#[tokio::test]
async fn past_delete_on_sweeps_files_then_record() {
    let dir = tempdir().unwrap();
    let filer = LocalFiler::new(dir.path());
    let store = HistoryStore::new(&filer, "proj");
    let cfg = branch_cfg(10);

    let mut doomed = record(NOW - 10 * 86_400, "doomed1");
    doomed.valid = false;
    doomed.delete_on = NOW - 1;
    for name in doomed.files.keys() {
        filer
            .upload(&format!("{}/{}", cfg.output_location, name), b"bytes", None)
            .await
            .unwrap();
    }
    store.save(&cfg, &doomed).await.unwrap();
    let keeper = record(NOW - 86_400, "keeper1");
    for name in keeper.files.keys() {
        filer
            .upload(&format!("{}/{}", cfg.output_location, name), b"bytes", None)
            .await
            .unwrap();
    }
    store.save(&cfg, &keeper).await.unwrap();

    let mut history = store.load(&cfg).await.unwrap();
    assert_eq!(history.len(), 2);
    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .unwrap();

    // Artifacts and the record object are gone; subsequent loads no longer
    // see the build.
    assert!(filer
        .download("nightly/main/proj-doomed1.tar.gz")
        .await
        .is_err());
    let reloaded = store.load(&cfg).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded.values().next().unwrap().revision,
        "keeper1"
    );
    assert!(filer
        .download("nightly/main/proj-keeper1.tar.gz")
        .await
        .is_ok());
}

#[tokio::test]
async fn under_the_window_nothing_expires() {
    let dir = tempdir().unwrap();
    let filer = LocalFiler::new(dir.path());
    let store = HistoryStore::new(&filer, "proj");
    let cfg = branch_cfg(10);

    let mut history = seed_builds(&filer, &store, &cfg, 3).await;
    run_retention(&filer, &store, &cfg, &mut history, NOW)
        .await
        .unwrap();
    assert!(history.values().all(|r| r.valid && r.delete_on == 0));
}

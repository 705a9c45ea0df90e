use std::path::Path;

use nightly_tarball_core::builder::Builder;
use nightly_tarball_core::config::{BranchConfig, ProjectConfig};
use nightly_tarball_core::contract::{Filer, MockSnapshotter, Snapshot, SnapshotError};
use nightly_tarball_core::filer::LocalFiler;
use nightly_tarball_core::history::BuildRecord;
use nightly_tarball_core::plan::DefaultPlan;
use tempfile::{tempdir, TempDir};

const BUILD_OK: &str = "echo payload > payload.txt && tar czf proj-snapshot.tar.gz payload.txt";
const BUILD_TWO_IDENTICAL: &str =
    "echo payload > payload.txt && tar czf a.tar.gz payload.txt && cp a.tar.gz b.tar.gz";
const BUILD_FAIL: &str = "echo about to break; exit 1";

fn project_config(scratch: &TempDir, branches: Vec<BranchConfig>) -> ProjectConfig {
    ProjectConfig {
        project_name: "Test Project".to_string(),
        project_short_name: "proj".to_string(),
        project_very_short_name: None,
        repository: "https://example.invalid/proj.git".to_string(),
        scratch_path: scratch.path().to_path_buf(),
        failed_build_prefix: Some("failed-builds".to_string()),
        failed_build_url: None,
        coverity: None,
        branches,
    }
}

fn branch(name: &str, max_count: usize) -> BranchConfig {
    BranchConfig {
        name: name.to_string(),
        output_location: format!("nightly/{name}"),
        max_count,
        coverity: false,
        legacy_output_location: None,
    }
}

fn shell_plan(script: &str) -> Box<DefaultPlan> {
    Box::new(DefaultPlan::new(Some(vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ])))
}

/// Snapshotter that materializes a minimal source tree and reports the
/// given revision.
fn fake_snapshotter(revision: &'static str) -> MockSnapshotter {
    let mut snapshotter = MockSnapshotter::new();
    snapshotter
        .expect_snapshot()
        .returning(move |_url, _branch, dest: &Path| {
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("file.txt"), "content")?;
            Ok(Snapshot {
                revision: revision.to_string(),
            })
        });
    snapshotter
}

#[tokio::test]
async fn successful_build_publishes_artifacts_record_and_latest_pointer() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let config = project_config(&scratch, vec![branch("main", 10)]);
    let builder = Builder::new(
        config,
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_OK),
    );

    let report = builder.run().await;
    assert_eq!(report.success, vec!["main".to_string()]);
    assert!(report.failed.is_empty());
    assert!(report.skipped.is_empty());
    assert!(report.is_healthy());

    let filer = builder.filer();
    let artifact = filer
        .download("nightly/main/proj-snapshot.tar.gz")
        .await
        .expect("artifact must be published");
    assert!(!artifact.is_empty());

    let records = filer.search("nightly/main", "build-*.json").await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].contains("build-proj-main-"));
    assert!(records[0].ends_with("-abc1234.json"));

    // Every filename in the record exists in the store under the branch
    // prefix: no dangling references at publish time.
    let record: BuildRecord =
        serde_json::from_slice(&filer.download(&records[0]).await.unwrap()).unwrap();
    assert!(record.valid);
    assert_eq!(record.revision, "abc1234");
    assert_eq!(record.delete_on, 0);
    for name in record.files.keys() {
        filer
            .download(&format!("nightly/main/{name}"))
            .await
            .unwrap_or_else(|_| panic!("record references unpublished file {name}"));
    }

    let latest = String::from_utf8(
        filer
            .download("nightly/main/latest_snapshot.txt")
            .await
            .unwrap(),
    )
    .unwrap();
    assert!(latest.starts_with("main-"));
    assert!(latest.ends_with("-abc1234\n"));

    // Checksums for the single valid build.
    let md5sums =
        String::from_utf8(filer.download("nightly/main/md5sums.txt").await.unwrap()).unwrap();
    assert_eq!(md5sums.lines().count(), 1);
    assert!(md5sums.contains("proj-snapshot.tar.gz"));

    // The working tree is gone whatever the outcome.
    let project_dir = scratch.path().join("proj");
    let leftovers: Vec<_> = std::fs::read_dir(&project_dir)
        .map(|it| it.flatten().collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "build tree must be deleted: {leftovers:?}");
}

#[tokio::test]
async fn unchanged_revision_is_skipped_with_no_new_writes() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    let first = Builder::new(
        project_config(&scratch, vec![branch("main", 10)]),
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_OK),
    );
    let report = first.run().await;
    assert_eq!(report.success, vec!["main".to_string()]);

    let filer = LocalFiler::new(store_dir.path());
    let records_before = filer.search("nightly/main", "build-*.json").await.unwrap();
    let latest_before = filer
        .download("nightly/main/latest_snapshot.txt")
        .await
        .unwrap();

    // Same revision again: the attempt classifies as SKIPPED and publishes
    // nothing new.
    let second = Builder::new(
        project_config(&scratch, vec![branch("main", 10)]),
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_FAIL), // would fail if the build ran at all
    );
    let report = second.run().await;
    assert_eq!(report.skipped, vec!["main".to_string()]);
    assert!(report.failed.is_empty());

    let records_after = filer.search("nightly/main", "build-*.json").await.unwrap();
    assert_eq!(records_before, records_after);
    assert_eq!(
        latest_before,
        filer
            .download("nightly/main/latest_snapshot.txt")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn changed_revision_builds_again_and_retention_expires_surplus() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    for (index, revision) in ["abc1234", "def5678"].into_iter().enumerate() {
        if index > 0 {
            // History entries are keyed by build time; give the second run a
            // distinct second.
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }
        let builder = Builder::new(
            project_config(&scratch, vec![branch("main", 1)]),
            LocalFiler::new(store_dir.path()),
            fake_snapshotter(revision),
            shell_plan(BUILD_OK),
        );
        let report = builder.run().await;
        assert_eq!(report.success, vec!["main".to_string()], "revision {revision}");
    }

    let filer = LocalFiler::new(store_dir.path());
    let records = filer.search("nightly/main", "build-*.json").await.unwrap();
    assert_eq!(records.len(), 2);
    let mut valid = 0;
    for key in &records {
        let record: BuildRecord =
            serde_json::from_slice(&filer.download(key).await.unwrap()).unwrap();
        if record.valid {
            valid += 1;
            assert_eq!(record.revision, "def5678");
        } else {
            assert_eq!(record.revision, "abc1234");
            assert!(record.delete_on > 0, "expired build gets a grace deadline");
        }
    }
    assert_eq!(valid, 1, "max_count=1 leaves one valid build");
}

#[tokio::test]
async fn failed_build_is_archived_and_writes_no_record() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let builder = Builder::new(
        project_config(&scratch, vec![branch("main", 10)]),
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_FAIL),
    );

    let report = builder.run().await;
    assert_eq!(report.failed, vec!["main".to_string()]);
    assert!(!report.is_healthy());

    let filer = builder.filer();
    let archives = filer
        .search("failed-builds", "proj-main-*-failed.tar.gz")
        .await
        .unwrap();
    assert_eq!(archives.len(), 1, "working tree archived for postmortem");

    let records = filer.search("nightly/main", "build-*.json").await.unwrap();
    assert!(records.is_empty(), "no record for a failed attempt");
    assert!(filer
        .download("nightly/main/latest_snapshot.txt")
        .await
        .is_err());
}

#[tokio::test]
async fn missing_failed_build_prefix_skips_archival_quietly() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let mut config = project_config(&scratch, vec![branch("main", 10)]);
    config.failed_build_prefix = None;
    let builder = Builder::new(
        config,
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_FAIL),
    );

    let report = builder.run().await;
    assert_eq!(report.failed, vec!["main".to_string()]);
    let archives = builder.filer().search("failed-builds", "*").await.unwrap();
    assert!(archives.is_empty());
}

#[tokio::test]
async fn snapshot_failure_is_branch_local() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let mut snapshotter = MockSnapshotter::new();
    // First branch's clone blows up; the second proceeds normally.
    snapshotter
        .expect_snapshot()
        .times(1)
        .returning(|_url, _branch, _dest: &Path| {
            Err(SnapshotError::CommandFailed {
                command: "git clone".to_string(),
                status: "exit status: 128".to_string(),
            })
        });
    snapshotter
        .expect_snapshot()
        .returning(|_url, _branch, dest: &Path| {
            std::fs::create_dir_all(dest)?;
            Ok(Snapshot {
                revision: "fed4321".to_string(),
            })
        });

    let builder = Builder::new(
        project_config(&scratch, vec![branch("main", 10), branch("v5.x", 10)]),
        LocalFiler::new(store_dir.path()),
        snapshotter,
        shell_plan(BUILD_OK),
    );
    let report = builder.run().await;
    assert_eq!(report.failed, vec!["main".to_string()]);
    assert_eq!(report.success, vec!["v5.x".to_string()]);
}

#[tokio::test]
async fn scratch_failure_is_systemic_and_stops_remaining_branches() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    // Occupy the project path with a file so directory creation fails.
    std::fs::write(scratch.path().join("proj"), b"in the way").unwrap();

    let mut snapshotter = MockSnapshotter::new();
    snapshotter.expect_snapshot().times(0);

    let builder = Builder::new(
        project_config(&scratch, vec![branch("main", 10), branch("v5.x", 10)]),
        LocalFiler::new(store_dir.path()),
        snapshotter,
        shell_plan(BUILD_OK),
    );
    let report = builder.run().await;
    assert_eq!(report.failed, vec!["main".to_string()]);
    assert!(report.success.is_empty());
    assert!(report.skipped.is_empty(), "v5.x must not have been attempted");
}

#[tokio::test]
async fn identical_content_artifacts_stay_distinct_entries() {
    let store_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let builder = Builder::new(
        project_config(&scratch, vec![branch("main", 10)]),
        LocalFiler::new(store_dir.path()),
        fake_snapshotter("abc1234"),
        shell_plan(BUILD_TWO_IDENTICAL),
    );

    let report = builder.run().await;
    assert_eq!(report.success, vec!["main".to_string()]);

    let filer = builder.filer();
    let records = filer.search("nightly/main", "build-*.json").await.unwrap();
    let record: BuildRecord =
        serde_json::from_slice(&filer.download(&records[0]).await.unwrap()).unwrap();
    assert_eq!(record.files.len(), 2);
    let a = &record.files["a.tar.gz"];
    let b = &record.files["b.tar.gz"];
    assert_eq!(a.md5, b.md5, "same content, same hash, separate entries");
    assert_eq!(a.sha1, b.sha1);

    let md5sums =
        String::from_utf8(filer.download("nightly/main/md5sums.txt").await.unwrap()).unwrap();
    assert_eq!(md5sums.lines().count(), 2);
}

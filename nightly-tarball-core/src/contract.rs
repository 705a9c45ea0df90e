//! # contract: collaborator interfaces for the build pipeline
//!
//! This module defines the traits the orchestrator depends on, plus their
//! error and supporting types:
//!
//! - [`Filer`]: key/blob storage for published artifacts, build records and
//!   derived listings (S3-like remote, local directory, or a test mock).
//! - [`Snapshotter`]: produces a local working copy of one branch of a
//!   remote repository and reports its head revision.
//! - [`Notifier`]: side-effect sink for the end-of-run summary report.
//!
//! ## Interface & Extensibility
//! - Implement [`Filer`] to add a new storage backend. `NotFound` must be
//!   surfaced as [`FilerError::NotFound`] so callers can distinguish an
//!   absent key from a transport failure.
//! - All methods are async and return concrete error enums.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests.

use async_trait::async_trait;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Error type for [`Filer`] operations.
///
/// `NotFound` is part of the contract: `download` and `delete` against an
/// absent key must report it, and callers rely on telling it apart from
/// transport problems.
#[derive(Debug, thiserror::Error)]
pub enum FilerError {
    #[error("no such object: {0}")]
    NotFound(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Error type for [`Snapshotter`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    CommandFailed { command: String, status: String },
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A checked-out working copy of one branch, as reported by a
/// [`Snapshotter`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Short revision identifier of the branch head (7 hex chars for git).
    pub revision: String,
}

/// Key/blob storage for build output.
///
/// Keys are '/'-separated paths relative to the store root; the branch
/// output location is a key prefix. The implementor is responsible for
/// connecting to the backing service (or local directory).
///
/// The trait is implemented by real clients and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Filer: Send + Sync {
    /// Fetch the object at `key` into memory. Fails with
    /// [`FilerError::NotFound`] when the key is absent.
    async fn download(&self, key: &str) -> Result<Vec<u8>, FilerError>;

    /// Store `data` at `key`, with an optional cache-control-like hint for
    /// backends that support it.
    async fn upload<'a>(
        &self,
        key: &str,
        data: &[u8],
        cache_control: Option<&'a str>,
    ) -> Result<(), FilerError>;

    /// Store the local file at `local` under `key`.
    async fn upload_file(&self, local: &Path, key: &str) -> Result<(), FilerError>;

    /// Delete the object at `key`. Fails with [`FilerError::NotFound`] when
    /// the key is absent.
    async fn delete(&self, key: &str) -> Result<(), FilerError>;

    /// List keys under the `dirname` prefix whose final component matches
    /// the glob-like `pattern` (`*` wildcard, literal dots). Returns full
    /// keys relative to the store root.
    async fn search(&self, dirname: &str, pattern: &str) -> Result<Vec<String>, FilerError>;
}

/// Produces a local working copy of one branch of a remote repository.
///
/// The destination directory must not exist beforehand; the implementor
/// creates it, materializes the branch head there, and reports the head
/// revision.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Check out `branch` of the repository at `url` into `dest` and return
    /// the snapshot metadata.
    async fn snapshot(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
    ) -> Result<Snapshot, SnapshotError>;
}

/// Side-effect sink for the end-of-run summary.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the aggregate report after all branches are processed.
    async fn notify(
        &self,
        report: &crate::notify::BuildReport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

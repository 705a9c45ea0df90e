//! Directory-backed [`Filer`] implementation.
//!
//! Stores every object as a plain file under a base directory, creating
//! parent directories on upload. Used heavily by the test suite, and usable
//! as a real store when publishing to a locally mounted volume.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::contract::{Filer, FilerError};

/// Filer over a local directory tree. Keys map 1:1 to relative paths.
pub struct LocalFiler {
    base: PathBuf,
}

impl LocalFiler {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn pathname(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

/// Translate a glob-like pattern (`*` wildcard, literal dots) into an
/// anchored regex. Storage backends rarely search natively, so patterns are
/// matched client-side against listed keys.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, FilerError> {
    let escaped = pattern.replace('.', r"\.").replace('*', ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map_err(|e| FilerError::Backend(format!("bad search pattern {pattern:?}: {e}")))
}

#[async_trait]
impl Filer for LocalFiler {
    async fn download(&self, key: &str) -> Result<Vec<u8>, FilerError> {
        debug!(key, "downloading to memory");
        let pathname = self.pathname(key);
        match fs::read(&pathname) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FilerError::NotFound(key.to_string()))
            }
            Err(e) => Err(FilerError::Io(e)),
        }
    }

    async fn upload<'a>(
        &self,
        key: &str,
        data: &[u8],
        _cache_control: Option<&'a str>,
    ) -> Result<(), FilerError> {
        debug!(key, size = data.len(), "uploading from memory");
        let pathname = self.pathname(key);
        if let Some(dirname) = pathname.parent() {
            fs::create_dir_all(dirname)?;
        }
        fs::write(&pathname, data)?;
        Ok(())
    }

    async fn upload_file(&self, local: &Path, key: &str) -> Result<(), FilerError> {
        debug!(local = %local.display(), key, "uploading from file");
        let pathname = self.pathname(key);
        if let Some(dirname) = pathname.parent() {
            fs::create_dir_all(dirname)?;
        }
        fs::copy(local, &pathname)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FilerError> {
        debug!(key, "deleting");
        let pathname = self.pathname(key);
        match fs::remove_file(&pathname) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FilerError::NotFound(key.to_string()))
            }
            Err(e) => Err(FilerError::Io(e)),
        }
    }

    async fn search(&self, dirname: &str, pattern: &str) -> Result<Vec<String>, FilerError> {
        let root = self.pathname(dirname);
        debug!(dirname, pattern, "searching");
        if !root.exists() {
            return Ok(Vec::new());
        }
        let regex = glob_to_regex(pattern)?;
        let mut keys = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| FilerError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if regex.is_match(&name) {
                keys.push(format!("{}/{}", dirname.trim_end_matches('/'), name));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

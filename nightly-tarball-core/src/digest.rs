//! Artifact content hashing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::history::ArtifactDigest;

/// Compute MD5, SHA-1 and SHA-256 digests plus size for one file, feeding
/// all three hashers from the same streamed reads.
pub fn compute_digests(path: &Path) -> std::io::Result<ArtifactDigest> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut size: u64 = 0;

    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
        size += n as u64;
    }

    Ok(ArtifactDigest {
        md5: format!("{:x}", md5.finalize()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: Some(format!("{:x}", sha256.finalize())),
        size,
    })
}

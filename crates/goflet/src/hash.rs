//! Content digests over files and strings.
//!
//! MD5/SHA-1/SHA-256 feed the file metadata; SHA3-256 derives the
//! fingerprint a relative path is stored under.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

/// Read buffer for streaming file digests.
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// Stream a file once through the given digest, returning lowercase hex.
fn file_digest<D: Digest>(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = D::new();
    let mut buf = [0u8; DIGEST_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {} for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// MD5 digest of a file.
pub fn file_md5(path: &Path) -> Result<String> {
    file_digest::<Md5>(path)
}

/// SHA-1 digest of a file.
pub fn file_sha1(path: &Path) -> Result<String> {
    file_digest::<Sha1>(path)
}

/// SHA-256 digest of a file.
pub fn file_sha256(path: &Path) -> Result<String> {
    file_digest::<Sha256>(path)
}

/// SHA3-256 digest of a UTF-8 string, lowercase hex. Cannot fail.
pub fn string_sha3_256(input: &str) -> String {
    hex::encode(Sha3_256::digest(input.as_bytes()))
}

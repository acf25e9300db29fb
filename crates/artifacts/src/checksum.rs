//! SHA-256 digests for artifact verification.
//!
//! Digests are lowercase hex. Comparison ignores case and surrounding
//! whitespace so checksums copied from model cards or `sha256sum` output
//! work as-is.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::ArtifactError;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Streams a file through SHA-256 without loading it whole.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Canonical form of a user-supplied digest, rejecting anything that is not
/// 32 bytes of hex.
pub fn normalize_digest(digest: &str) -> Result<String, ArtifactError> {
    let digest = digest.trim().to_ascii_lowercase();
    match hex::decode(&digest) {
        Ok(bytes) if bytes.len() == 32 => Ok(digest),
        _ => Err(ArtifactError::InvalidSpec(format!(
            "`{digest}` is not a sha256 hex digest"
        ))),
    }
}

pub fn digest_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Default [`ArtifactSource::verify`](crate::ArtifactSource::verify).
pub fn verify_sha256(bytes: &[u8], expected: &str) -> bool {
    digest_eq(&sha256_hex(bytes), expected)
}

//! Per-document cache namespaces.
//!
//! A namespace is the first 16 hex digits of the SHA-256 of the document's
//! bytes, so the same file maps to the same cache directory across restarts
//! and an edited file never sees stale artifacts.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const NAMESPACE_LEN: usize = 16;

pub fn namespace_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    truncate(format!("{:x}", hasher.finalize()))
}

/// Hashes the file at `path` without loading it into memory at once.
pub fn document_namespace(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(truncate(format!("{:x}", hasher.finalize())))
}

fn truncate(mut hex: String) -> String {
    hex.truncate(NAMESPACE_LEN);
    hex
}

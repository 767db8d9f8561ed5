//! Content-addressed hashing.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `text`.
///
/// Hashes the exact bytes: the same substring always yields the same hash, and
/// there is no size cut-off below which hashing is skipped.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

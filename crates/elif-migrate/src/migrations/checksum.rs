//! Content checksums for drift detection

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the exact script bytes
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

//! Checksum utilities for invoice integrity hashing

use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 digest of a byte slice.
///
/// This is the integrity hash stored alongside every invoice: it is always
/// recomputed from the exact bytes read and never trusted from content.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

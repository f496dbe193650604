// Hex-encoded SHA-256 digests used for fingerprints and lock keys

use sha2::{Digest, Sha256};

/// SHA-256 of `data`, lowercase hex
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

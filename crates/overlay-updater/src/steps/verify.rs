//! SHA256 verification for downloaded archives.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};

/// Buffer size for reading files during checksum computation.
const BUFFER_SIZE: usize = 64 * 1024;

/// Normalizes a digest string to lowercase hex.
///
/// Accepts "sha256:abc123" and plain "abc123". Returns `None` unless the
/// result is exactly 64 hex characters.
#[must_use]
pub fn normalize_digest(digest: &str) -> Option<String> {
    let hex = digest
        .trim()
        .strip_prefix("sha256:")
        .unwrap_or(digest.trim())
        .to_lowercase();

    (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit())).then_some(hex)
}

/// Compares an already computed hash against the expected digest.
pub fn verify_sha256(actual_hash: &str, expected_digest: &str) -> Result<()> {
    let expected = normalize_digest(expected_digest).ok_or_else(|| UpdateError::Integrity {
        expected: expected_digest.to_string(),
        actual: actual_hash.to_string(),
    })?;

    if !actual_hash.eq_ignore_ascii_case(&expected) {
        return Err(UpdateError::Integrity {
            expected,
            actual: actual_hash.to_lowercase(),
        });
    }

    tracing::info!("SHA256 verification passed: {}", expected);
    Ok(())
}

/// Computes the SHA256 hash of the given data.
#[must_use]
pub fn compute_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Computes the SHA256 hash of a file.
pub fn compute_file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    #[test]
    fn test_compute_sha256() {
        assert_eq!(compute_sha256(b"Hello, World!"), HELLO_SHA256);
    }

    #[test]
    fn test_verify_with_and_without_prefix() {
        assert!(verify_sha256(HELLO_SHA256, &format!("sha256:{HELLO_SHA256}")).is_ok());
        assert!(verify_sha256(HELLO_SHA256, &HELLO_SHA256.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_mismatch() {
        let wrong = format!("sha256:{}", "0".repeat(64));
        let result = verify_sha256(HELLO_SHA256, &wrong);
        assert!(matches!(result, Err(UpdateError::Integrity { .. })));
    }

    #[test]
    fn test_malformed_digest_is_integrity_error() {
        assert!(normalize_digest("sha256:abc").is_none());
        assert!(matches!(
            verify_sha256(HELLO_SHA256, "not-a-digest"),
            Err(UpdateError::Integrity { .. })
        ));
    }

    #[test]
    fn test_compute_file_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"Hello, World!").unwrap();
        assert_eq!(compute_file_sha256(&path).unwrap(), HELLO_SHA256);
    }
}

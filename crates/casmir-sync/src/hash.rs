//! SHA-256 content hashing.
//!
//! The digest is the content identity: identical bytes hash to identical
//! keys in the blob store regardless of path. Files are streamed through
//! the hasher in 64 KiB chunks so memory use is flat for any file size.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use casmir_core::{CasmirError, CasmirResult};

/// Read buffer for streaming hashes
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hash a byte slice in memory. Fast for small inputs and tests.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file from disk using the streaming interface.
///
/// Open and read failures come back as `Hash` errors; callers treat them
/// as a per-file skip, not a fatal condition.
pub fn hash_file(path: &Path) -> CasmirResult<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| CasmirError::Hash(format!("opening {}: {e}", path.display())))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| CasmirError::Hash(format!("reading {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file on the blocking pool, keeping the runtime threads free.
pub async fn hash_file_async(path: &Path) -> CasmirResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| CasmirError::Hash(format!("hash task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_matches_known_sha256() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_lowercase_hex_64_chars() {
        let hex = hash_bytes(b"casmir");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn file_and_bytes_agree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sample.bin");
        let content: Vec<u8> = (0u32..200_000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&content));
    }

    #[test]
    fn missing_file_is_a_hash_error() {
        let err = hash_file(std::path::Path::new("/nonexistent/file")).unwrap_err();
        assert!(matches!(err, CasmirError::Hash(_)));
    }

    #[tokio::test]
    async fn async_wrapper_matches_sync_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"async hash").unwrap();
        assert_eq!(hash_file_async(&path).await.unwrap(), hash_bytes(b"async hash"));
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            prop_assert_eq!(hash_bytes(&data), hash_bytes(&data));
        }
    }
}

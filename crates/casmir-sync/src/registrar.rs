//! Turns a filesystem path into durable `files`/`file_contents` rows.
//!
//! Write order is content record first, then file record, so a file row
//! always points at an existing digest row. Every step is an idempotent
//! upsert; on failure the path is reported as an error and the next scan
//! reconverges, with no rollback.

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use casmir_core::types::FileRecord;
use casmir_core::{CasmirError, CasmirResult};
use casmir_db::MetadataGateway;

use crate::hash;
use crate::meta::{self, path_to_posix};

/// `full_path -> content_hash` snapshot shared by scan workers and the
/// watcher processor. Writes go through a short-lived mutex; a lost
/// update only costs a redundant re-registration on the next sighting.
#[derive(Clone, Default)]
pub struct SharedPathMap {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl SharedPathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly fetched snapshot (start of a full scan).
    pub fn replace(&self, map: HashMap<String, String>) {
        *self.inner.lock().unwrap() = map;
    }

    pub fn get(&self, full_path: &str) -> Option<String> {
        self.inner.lock().unwrap().get(full_path).cloned()
    }

    pub fn insert(&self, full_path: String, content_hash: String) {
        self.inner.lock().unwrap().insert(full_path, content_hash);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// What happened to one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First sighting: new file record created
    Registered,
    /// Known path, content or metadata changed
    Updated,
    /// Hash matches the snapshot; only last_seen_at advanced
    Unchanged,
    /// Security or size gate: not registered, with the reason
    Skipped(String),
}

impl RegisterOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RegisterOutcome::Registered => "registered",
            RegisterOutcome::Updated => "updated",
            RegisterOutcome::Unchanged => "unchanged",
            RegisterOutcome::Skipped(_) => "skipped",
        }
    }
}

pub struct Registrar {
    gateway: Arc<dyn MetadataGateway>,
    path_map: SharedPathMap,
    max_file_size: u64,
}

impl Registrar {
    pub fn new(gateway: Arc<dyn MetadataGateway>, path_map: SharedPathMap, max_file_size: u64) -> Self {
        Self {
            gateway,
            path_map,
            max_file_size,
        }
    }

    pub fn path_map(&self) -> &SharedPathMap {
        &self.path_map
    }

    /// Register one path observed under `source_base`.
    pub async fn register(&self, path: &Path, source_base: &Path) -> CasmirResult<RegisterOutcome> {
        let st = std::fs::symlink_metadata(path)
            .map_err(|e| CasmirError::Stat(format!("stat {}: {e}", path.display())))?;
        let file_type = st.file_type();

        if file_type.is_symlink() {
            // A link resolving outside its source tree could exfiltrate
            // arbitrary host files into the store
            let resolved = match std::fs::canonicalize(path) {
                Ok(p) => p,
                Err(_) => return Ok(RegisterOutcome::Skipped("broken symlink".into())),
            };
            let base = std::fs::canonicalize(source_base)
                .unwrap_or_else(|_| source_base.to_path_buf());
            if !resolved.starts_with(&base) {
                return Ok(RegisterOutcome::Skipped("symlink escape".into()));
            }
        } else if !file_type.is_file() {
            return Ok(RegisterOutcome::Skipped("not a regular file".into()));
        }

        if st.len() > self.max_file_size {
            return Ok(RegisterOutcome::Skipped(format!("too large: {} bytes", st.len())));
        }

        let content_hash = hash::hash_file_async(path).await?;
        let full_path = path_to_posix(path);

        // Cheap path: snapshot already holds this exact digest
        let known_hash = self.path_map.get(&full_path);
        if known_hash.as_deref() == Some(content_hash.as_str()) {
            self.gateway.touch_file(&full_path).await?;
            debug!(path = %full_path, "unchanged");
            return Ok(RegisterOutcome::Unchanged);
        }

        let extracted = meta::extract_metadata(path, source_base)?;

        // Content row before file row: referential integrity
        self.gateway
            .upsert_content(&content_hash, extracted.size_bytes, extracted.mime_type.as_deref())
            .await?;

        let record = FileRecord {
            full_path: full_path.clone(),
            content_hash: Some(content_hash.clone()),
            filename: extracted.filename,
            folder_path: extracted.folder_path,
            fs_created_at: extracted.fs_created_at,
            fs_modified_at: extracted.fs_modified_at,
            fs_inode: extracted.fs_inode,
            fs_attributes: extracted.fs_attributes,
            auto_metadata: extracted.auto_metadata,
            last_seen_at: Utc::now(),
            deleted_at: None,
        };
        self.gateway.upsert_file(&record).await?;

        self.path_map.insert(full_path, content_hash);
        Ok(if known_hash.is_some() {
            RegisterOutcome::Updated
        } else {
            RegisterOutcome::Registered
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casmir_core::types::UploadStatus;
    use casmir_db::MemoryGateway;
    use tempfile::TempDir;

    fn registrar(gateway: Arc<MemoryGateway>) -> Registrar {
        Registrar::new(gateway, SharedPathMap::new(), u64::MAX)
    }

    #[tokio::test]
    async fn first_sighting_creates_both_records() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let outcome = reg.register(&path, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);

        let full_path = path_to_posix(&path);
        let file = gw.file(&full_path).expect("file record exists");
        let expected_hash = crate::hash::hash_bytes(b"hello");
        assert_eq!(file.content_hash.as_deref(), Some(expected_hash.as_str()));
        assert!(file.deleted_at.is_none());

        let content = gw.content(&expected_hash).expect("content record exists");
        assert_eq!(content.upload_status, UploadStatus::Pending);
        assert_eq!(content.size_bytes, 5);
        assert_eq!(content.mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn second_sighting_of_unchanged_file_only_touches() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        reg.register(&path, tmp.path()).await.unwrap();
        let first_seen = gw.file(&path_to_posix(&path)).unwrap().last_seen_at;

        let outcome = reg.register(&path, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Unchanged);

        let after = gw.file(&path_to_posix(&path)).unwrap();
        assert!(after.last_seen_at >= first_seen, "last_seen_at advances");
        assert_eq!(gw.content_count(), 1);
    }

    #[tokio::test]
    async fn changed_content_updates_record_and_keeps_old_digest() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");

        std::fs::write(&path, b"one").unwrap();
        reg.register(&path, tmp.path()).await.unwrap();
        std::fs::write(&path, b"two").unwrap();
        let outcome = reg.register(&path, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Updated);

        let file = gw.file(&path_to_posix(&path)).unwrap();
        assert_eq!(
            file.content_hash.as_deref(),
            Some(crate::hash::hash_bytes(b"two").as_str())
        );
        // previous digest is not garbage-collected
        assert_eq!(gw.content_count(), 2);
    }

    #[tokio::test]
    async fn oversize_file_is_skipped() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = Registrar::new(gw.clone(), SharedPathMap::new(), 4);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, b"more than four bytes").unwrap();

        let outcome = reg.register(&path, tmp.path()).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Skipped(ref r) if r.starts_with("too large")));
        assert_eq!(gw.file_count(), 0);
        assert_eq!(gw.content_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn escaping_symlink_is_skipped() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let outside = TempDir::new().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, b"keys").unwrap();

        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("sneaky");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let outcome = reg.register(&link, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Skipped("symlink escape".into()));
        assert_eq!(gw.file_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn in_tree_symlink_registers_through_target() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("real.txt");
        std::fs::write(&target, b"linked content").unwrap();
        let link = tmp.path().join("alias.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let outcome = reg.register(&link, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);
        let file = gw.file(&path_to_posix(&link)).unwrap();
        assert_eq!(
            file.content_hash.as_deref(),
            Some(crate::hash::hash_bytes(b"linked content").as_str())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_symlink_is_skipped_not_an_error() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw.clone());
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("dangling");
        std::os::unix::fs::symlink(tmp.path().join("gone"), &link).unwrap();

        let outcome = reg.register(&link, tmp.path()).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Skipped("broken symlink".into()));
    }

    #[tokio::test]
    async fn missing_path_reports_stat_error() {
        let gw = Arc::new(MemoryGateway::new());
        let reg = registrar(gw);
        let tmp = TempDir::new().unwrap();
        let err = reg
            .register(&tmp.path().join("gone.txt"), tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CasmirError::Stat(_)));
    }
}

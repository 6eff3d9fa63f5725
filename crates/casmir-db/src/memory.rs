//! In-process gateway backend.
//!
//! Implements the full contract (resurrection, prefix-scoped
//! soft-delete, atomic dequeue, status no-regress) against two hash
//! maps under one lock, so the sync engine can be exercised end to end
//! without a live metadata server. Fills the role opendal's `Memory`
//! service fills for blob storage in the integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use casmir_core::types::{ContentRecord, FileRecord, PendingUpload, UploadStatus};
use casmir_core::CasmirResult;

use crate::gateway::{truncate_error, MetadataGateway};

#[derive(Default)]
struct Inner {
    files: HashMap<String, FileRecord>,
    contents: HashMap<String, ContentRecord>,
}

#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test inspection: a copy of the file record at `full_path`, if any.
    pub fn file(&self, full_path: &str) -> Option<FileRecord> {
        self.inner.lock().unwrap().files.get(full_path).cloned()
    }

    /// Test inspection: a copy of the content record for `content_hash`.
    pub fn content(&self, content_hash: &str) -> Option<ContentRecord> {
        self.inner.lock().unwrap().contents.get(content_hash).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().unwrap().files.len()
    }

    pub fn content_count(&self) -> usize {
        self.inner.lock().unwrap().contents.len()
    }
}

#[async_trait]
impl MetadataGateway for MemoryGateway {
    async fn fetch_path_map(&self) -> CasmirResult<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .values()
            .filter(|f| f.deleted_at.is_none())
            .filter_map(|f| {
                f.content_hash
                    .as_ref()
                    .map(|h| (f.full_path.clone(), h.clone()))
            })
            .collect())
    }

    async fn upsert_content(
        &self,
        content_hash: &str,
        size_bytes: u64,
        mime_type: Option<&str>,
    ) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.contents.get_mut(content_hash) {
            Some(existing) => {
                // Merge never touches upload state
                existing.size_bytes = size_bytes;
                existing.mime_type = mime_type.map(str::to_string);
                existing.db_updated_at = Some(Utc::now());
            }
            None => {
                inner.contents.insert(
                    content_hash.to_string(),
                    ContentRecord {
                        content_hash: content_hash.to_string(),
                        size_bytes,
                        mime_type: mime_type.map(str::to_string),
                        upload_status: UploadStatus::Pending,
                        storage_path: None,
                        last_error: None,
                        retry_count: 0,
                        db_updated_at: Some(Utc::now()),
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert_file(&self, record: &FileRecord) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut stored = record.clone();
        stored.deleted_at = None;
        inner.files.insert(stored.full_path.clone(), stored);
        Ok(())
    }

    async fn touch_file(&self, full_path: &str) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(file) = inner.files.get_mut(full_path) {
            file.last_seen_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_deleted(&self, path_prefix: &str, before: DateTime<Utc>) -> CasmirResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut count = 0;
        for file in inner.files.values_mut() {
            if file.deleted_at.is_none()
                && file.full_path.starts_with(path_prefix)
                && file.last_seen_at < before
            {
                file.deleted_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn dequeue_upload_batch(
        &self,
        batch_size: u32,
        path_prefixes: &[String],
    ) -> CasmirResult<Vec<PendingUpload>> {
        let mut inner = self.inner.lock().unwrap();

        // One live path per pending digest, scoped to the given prefixes
        let mut claimable: Vec<(String, String)> = Vec::new();
        for content in inner.contents.values() {
            if content.upload_status != UploadStatus::Pending {
                continue;
            }
            let path = inner.files.values().find(|f| {
                f.deleted_at.is_none()
                    && f.content_hash.as_deref() == Some(content.content_hash.as_str())
                    && path_prefixes.iter().any(|p| f.full_path.starts_with(p.as_str()))
            });
            if let Some(file) = path {
                claimable.push((content.content_hash.clone(), file.full_path.clone()));
            }
        }
        claimable.sort(); // deterministic claim order
        claimable.truncate(batch_size as usize);

        let mut batch = Vec::with_capacity(claimable.len());
        for (hash, full_path) in claimable {
            let content = inner.contents.get_mut(&hash).unwrap();
            content.upload_status = UploadStatus::Uploading;
            content.db_updated_at = Some(Utc::now());
            batch.push(PendingUpload {
                content_hash: hash,
                full_path,
            });
        }
        Ok(batch)
    }

    async fn mark_upload_complete(
        &self,
        content_hash: &str,
        storage_path: &str,
        mime_type: &str,
    ) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(content) = inner.contents.get_mut(content_hash) {
            content.upload_status = UploadStatus::Uploaded;
            content.storage_path = Some(storage_path.to_string());
            content.mime_type = Some(mime_type.to_string());
            content.last_error = None;
            content.db_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_upload_failed(&self, content_hash: &str, error: &str) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(content) = inner.contents.get_mut(content_hash) {
            // The store's backoff schedule is collapsed to an immediate
            // return-to-pending here; tests drive retries explicitly.
            content.upload_status = UploadStatus::Pending;
            content.retry_count += 1;
            content.last_error = Some(truncate_error(error));
            content.db_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_upload_skipped(&self, content_hash: &str, reason: &str) -> CasmirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(content) = inner.contents.get_mut(content_hash) {
            content.upload_status = UploadStatus::Skipped;
            content.last_error = Some(truncate_error(reason));
            content.db_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn reset_stuck_uploads(&self) -> CasmirResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for content in inner.contents.values_mut() {
            if content.upload_status == UploadStatus::Uploading {
                content.upload_status = UploadStatus::Pending;
                content.db_updated_at = Some(Utc::now());
                count += 1;
            }
        }
        Ok(count)
    }
}

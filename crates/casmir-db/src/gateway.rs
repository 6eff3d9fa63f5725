//! The narrow contract every metadata backend implements

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use casmir_core::types::{FileRecord, PendingUpload};
use casmir_core::CasmirResult;

/// Maximum length of an error string persisted with a failed upload
pub const ERROR_TRUNCATE_LEN: usize = 500;

/// Clamp an error message before it is written to the store.
/// Truncation is by characters, not bytes, so multi-byte text stays valid.
pub fn truncate_error(error: &str) -> String {
    error.chars().take(ERROR_TRUNCATE_LEN).collect()
}

/// Operations the sync engine needs from the metadata store.
///
/// All implementations are stateless beyond their connection; every call
/// is an idempotent upsert or an atomic state transition, so callers never
/// roll back. The next scan reconverges.
#[async_trait]
pub trait MetadataGateway: Send + Sync {
    /// Full `full_path -> content_hash` map over live (non-deleted) file
    /// records. Paginated with stable ordering so pages cannot skip or
    /// duplicate rows. Paths with a null hash are omitted; they re-register
    /// on the next sighting either way.
    async fn fetch_path_map(&self) -> CasmirResult<HashMap<String, String>>;

    /// Merge a content record on `content_hash`. Inserts in `pending`
    /// status when absent; never regresses an existing status.
    async fn upsert_content(
        &self,
        content_hash: &str,
        size_bytes: u64,
        mime_type: Option<&str>,
    ) -> CasmirResult<()>;

    /// Merge a file record on `full_path`, clearing `deleted_at`
    /// (resurrection).
    async fn upsert_file(&self, record: &FileRecord) -> CasmirResult<()>;

    /// Advance `last_seen_at` only.
    async fn touch_file(&self, full_path: &str) -> CasmirResult<()>;

    /// Soft-delete live rows under `path_prefix` whose `last_seen_at`
    /// predates `before`. Returns the affected row count.
    async fn mark_deleted(&self, path_prefix: &str, before: DateTime<Utc>) -> CasmirResult<u64>;

    /// Atomically claim up to `batch_size` pending uploads reachable from
    /// a live file under one of `path_prefixes`, flipping them to
    /// `uploading`. Two concurrent workers never receive the same row.
    async fn dequeue_upload_batch(
        &self,
        batch_size: u32,
        path_prefixes: &[String],
    ) -> CasmirResult<Vec<PendingUpload>>;

    /// Record a completed blob transfer: `uploaded` + `storage_path`.
    async fn mark_upload_complete(
        &self,
        content_hash: &str,
        storage_path: &str,
        mime_type: &str,
    ) -> CasmirResult<()>;

    /// Record a failed transfer; increments `retry_count` and returns the
    /// row to `pending` for a later attempt.
    async fn mark_upload_failed(&self, content_hash: &str, error: &str) -> CasmirResult<()>;

    /// Permanently exclude a digest from upload.
    async fn mark_upload_skipped(&self, content_hash: &str, reason: &str) -> CasmirResult<()>;

    /// Revert rows stranded in `uploading` by a crashed worker back to
    /// `pending`. Returns the affected row count.
    async fn reset_stuck_uploads(&self) -> CasmirResult<u64>;
}

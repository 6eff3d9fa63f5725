use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Upload lifecycle of a unique content digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Registered, waiting for a worker
    Pending,
    /// Claimed by a worker, blob transfer in flight
    Uploading,
    /// Blob stored, storage_path set
    Uploaded,
    /// Transfer failed; returns to pending for retry
    Failed,
    /// Permanently excluded (e.g. oversize); never retried
    Skipped,
}

impl UploadStatus {
    /// Rank used to prevent status regression on merge.
    /// A record never moves to a lower-ranked status via upsert.
    pub fn rank(self) -> u8 {
        match self {
            UploadStatus::Pending => 0,
            UploadStatus::Uploading => 1,
            UploadStatus::Failed => 1,
            UploadStatus::Uploaded => 2,
            UploadStatus::Skipped => 2,
        }
    }
}

/// One row in the `files` table, one per live path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute POSIX-form path, the canonical identifier
    pub full_path: String,
    /// Hex digest of the content; null only in a transient window
    pub content_hash: Option<String>,
    pub filename: String,
    /// Source-base name + path relative to the source base
    pub folder_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_inode: Option<u64>,
    /// Unstructured stat output: size, uid, gid, mode, symlink flag
    pub fs_attributes: serde_json::Value,
    /// Inferred metadata: MIME type, extension, source base
    pub auto_metadata: serde_json::Value,
    pub last_seen_at: DateTime<Utc>,
    /// Non-null means soft-deleted; cleared only by resurrection
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One row in the `file_contents` table, one per unique digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_hash: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub upload_status: UploadStatus,
    pub storage_path: Option<String>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_updated_at: Option<DateTime<Utc>>,
}

/// A dequeued upload work item: the digest plus one live path holding it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpload {
    pub content_hash: String,
    pub full_path: String,
}

/// Kind of filesystem change observed by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Moved,
}

/// A file event waiting out the debounce window
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub timestamp: Instant,
    /// Set for moved events only
    pub dest_path: Option<PathBuf>,
}

impl PendingEvent {
    pub fn new(path: PathBuf, kind: EventKind) -> Self {
        Self {
            path,
            kind,
            timestamp: Instant::now(),
            dest_path: None,
        }
    }

    pub fn moved(path: PathBuf, dest_path: PathBuf) -> Self {
        Self {
            path,
            kind: EventKind::Moved,
            timestamp: Instant::now(),
            dest_path: Some(dest_path),
        }
    }

    /// The path the registrar should process: the destination for moves,
    /// the event path otherwise.
    pub fn effective_path(&self) -> &std::path::Path {
        self.dest_path.as_deref().unwrap_or(&self.path)
    }
}

/// Counters for one full scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub registered: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub soft_deleted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub duration: Duration,
}

impl ScanStats {
    /// Fold another source root's counters into this one
    pub fn merge(&mut self, other: &ScanStats) {
        self.registered += other.registered;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.soft_deleted += other.soft_deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.duration += other.duration;
    }

    pub fn total_seen(&self) -> u64 {
        self.registered + self.updated + self.unchanged + self.skipped + self.errors
    }
}

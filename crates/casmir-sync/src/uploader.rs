//! Durable upload worker.
//!
//! Drains the DB-backed queue: atomically claims pending digests, pushes
//! blobs to the object store under their content hash, and records the
//! outcome. The queue decouples scan throughput from upload bandwidth.
//! Claims survive process crashes as `uploading` rows, which the next
//! worker start resets to `pending`.

use opendal::Operator;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use casmir_core::types::PendingUpload;
use casmir_core::CasmirResult;
use casmir_db::MetadataGateway;

use crate::meta::{guess_mime, path_to_posix};

/// Sleep when the queue is empty, and after a loop-level failure
const IDLE_SLEEP: Duration = Duration::from_secs(10);

/// Granularity of shutdown checks while sleeping
const PAUSE_TICK: Duration = Duration::from_millis(250);

const OCTET_STREAM: &str = "application/octet-stream";

pub struct Uploader {
    gateway: Arc<dyn MetadataGateway>,
    operator: Operator,
    path_prefixes: Vec<String>,
    batch_size: u32,
    max_upload_size: u64,
    running: Arc<AtomicBool>,
    idle_sleep: Duration,
}

impl Uploader {
    pub fn new(
        gateway: Arc<dyn MetadataGateway>,
        operator: Operator,
        sources: &[PathBuf],
        batch_size: u32,
        max_upload_size: u64,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            gateway,
            operator,
            path_prefixes: sources.iter().map(|p| path_to_posix(p)).collect(),
            batch_size,
            max_upload_size,
            running,
            idle_sleep: IDLE_SLEEP,
        }
    }

    /// Shorten the idle sleep (tests)
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Worker loop; returns when the shared running flag clears.
    pub async fn run(&self) {
        // Recover claims stranded by a crashed worker
        match self.gateway.reset_stuck_uploads().await {
            Ok(0) => {}
            Ok(count) => info!(count, "reset stuck uploads"),
            Err(e) => warn!(error = %e, "reset_stuck_uploads failed"),
        }
        info!(batch_size = self.batch_size, "upload worker started");

        while self.running.load(Ordering::SeqCst) {
            match self.drain_once().await {
                Ok(0) => self.pause(self.idle_sleep).await,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "upload loop error, backing off");
                    self.pause(self.idle_sleep).await;
                }
            }
        }
        info!("upload worker stopped");
    }

    /// One dequeue round. Returns the number of claimed items.
    pub async fn drain_once(&self) -> CasmirResult<usize> {
        let batch = self
            .gateway
            .dequeue_upload_batch(self.batch_size, &self.path_prefixes)
            .await?;

        for item in &batch {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.process_one(item).await;
        }
        Ok(batch.len())
    }

    async fn process_one(&self, item: &PendingUpload) {
        let hash = &item.content_hash;
        let path = Path::new(&item.full_path);

        let st = match std::fs::symlink_metadata(path) {
            Ok(st) => st,
            Err(_) => {
                warn!(hash = %short(hash), path = %item.full_path, "local file missing");
                self.mark_failed(hash, "file missing").await;
                return;
            }
        };

        // Blobs are buffered fully in memory; cap what one item may cost
        if st.len() > self.max_upload_size {
            let reason = format!("file too large for upload: {} bytes", st.len());
            warn!(hash = %short(hash), path = %item.full_path, reason = %reason, "skipping");
            if let Err(e) = self.gateway.mark_upload_skipped(hash, &reason).await {
                warn!(hash = %short(hash), error = %e, "mark_upload_skipped failed");
            }
            return;
        }

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                self.mark_failed(hash, &format!("reading {}: {e}", item.full_path))
                    .await;
                return;
            }
        };

        let mime = guess_mime(path).unwrap_or_else(|| OCTET_STREAM.to_string());

        // Content-addressed key: the digest itself, no extension
        match casmir_storage::put_blob(&self.operator, hash, data, &mime).await {
            Ok(()) => {
                if let Err(e) = self.gateway.mark_upload_complete(hash, hash, &mime).await {
                    // The blob landed; a later retry re-puts the same key
                    warn!(hash = %short(hash), error = %e, "mark_upload_complete failed");
                    return;
                }
                info!(hash = %short(hash), size = st.len(), from = %item.full_path, "uploaded content");
            }
            Err(e) => {
                self.mark_failed(hash, &e.to_string()).await;
            }
        }
    }

    async fn mark_failed(&self, hash: &str, error: &str) {
        if let Err(e) = self.gateway.mark_upload_failed(hash, error).await {
            warn!(hash = %short(hash), error = %e, "mark_upload_failed failed");
        }
    }

    /// Sleep that wakes promptly on shutdown
    async fn pause(&self, duration: Duration) {
        let started = std::time::Instant::now();
        while self.running.load(Ordering::SeqCst) && started.elapsed() < duration {
            tokio::time::sleep(PAUSE_TICK.min(duration)).await;
        }
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(10)]
}

//! Full-tree reconciliation.
//!
//! A scan converges database state to filesystem truth: every file found
//! on disk is registered (or touched), then paths the scan did not see
//! are soft-deleted. The sweep predicate compares `last_seen_at` against
//! the scan's start timestamp, captured before the path map is fetched,
//! so a concurrent watcher-initiated registration (which advances
//! `last_seen_at` past scan start) is never swept.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use casmir_core::types::ScanStats;
use casmir_db::MetadataGateway;

use crate::meta::path_to_posix;
use crate::registrar::{RegisterOutcome, Registrar};

/// Directory names never descended into during a walk
const SKIP_DIRS: &[&str] = &["@eaDir", "#recycle", ".SynologyWorkingDirectory"];

/// Collect all candidate files under `root` recursively, skipping hidden
/// and known system directories. Unreadable directories are logged and
/// skipped; a scan always completes.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files_inner(root, &mut files);
    files.sort(); // deterministic order
    files
}

fn collect_files_inner(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read directory, skipping");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read entry, skipping");
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()) {
            continue;
        }

        match entry.file_type() {
            Ok(ft) if ft.is_dir() => collect_files_inner(&path, out),
            // symlinks are collected too; the registrar gates them
            Ok(_) => out.push(path),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot stat entry, skipping"),
        }
    }
}

/// Run one full scan over `sources`.
///
/// 1. Capture `scan_start`.
/// 2. Refresh the shared path-map snapshot from the store.
/// 3. Register every file under every root with a bounded worker pool.
/// 4. Soft-delete rows under each root not seen since `scan_start`.
pub async fn run_full_scan(
    gateway: Arc<dyn MetadataGateway>,
    registrar: Arc<Registrar>,
    sources: &[PathBuf],
    workers: usize,
) -> ScanStats {
    let started = Instant::now();
    let scan_start = Utc::now();
    let mut stats = ScanStats::default();

    // The snapshot must be fetched after scan_start is captured; see
    // module docs for the sweep-safety argument.
    match gateway.fetch_path_map().await {
        Ok(map) => {
            info!(paths = map.len(), "path map loaded");
            registrar.path_map().replace(map);
        }
        Err(e) => {
            // Registering without a snapshot is only slower, not wrong:
            // every file takes the full upsert path
            warn!(error = %e, "path map fetch failed, scanning without snapshot");
            registrar.path_map().replace(Default::default());
        }
    }

    for source in sources {
        if !source.exists() {
            warn!(path = %source.display(), "source path does not exist, skipping");
            continue;
        }

        info!(path = %source.display(), "scanning source");
        let files = collect_files(source);
        let total = files.len();
        info!(path = %source.display(), files = total, "walk complete");

        stats.merge(&register_all(registrar.clone(), source, files, workers).await);

        // Sweep: anything under this root not seen by this scan is gone
        match gateway
            .mark_deleted(&path_to_posix(source), scan_start)
            .await
        {
            Ok(count) => {
                if count > 0 {
                    info!(path = %source.display(), count, "soft-deleted vanished paths");
                }
                stats.soft_deleted += count;
            }
            Err(e) => {
                warn!(path = %source.display(), error = %e, "soft-delete sweep failed");
                stats.errors += 1;
            }
        }
    }

    stats.duration = started.elapsed();
    info!(
        registered = stats.registered,
        updated = stats.updated,
        unchanged = stats.unchanged,
        soft_deleted = stats.soft_deleted,
        skipped = stats.skipped,
        errors = stats.errors,
        duration_secs = stats.duration.as_secs_f64(),
        "scan complete"
    );
    stats
}

/// Register `files` with at most `workers` registrations in flight.
async fn register_all(
    registrar: Arc<Registrar>,
    source: &Path,
    files: Vec<PathBuf>,
    workers: usize,
) -> ScanStats {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let total = files.len();
    let mut tasks = tokio::task::JoinSet::new();

    for (i, path) in files.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");
        let registrar = registrar.clone();
        let source = source.to_path_buf();

        tasks.spawn(async move {
            let _permit = permit;
            let result = registrar.register(&path, &source).await;
            match &result {
                Ok(RegisterOutcome::Unchanged) => {}
                Ok(outcome) => {
                    info!("[{}/{}] {}: {}", i + 1, total, outcome.label(), path.display());
                }
                Err(e) => {
                    warn!("[{}/{}] error: {}: {}", i + 1, total, path.display(), e);
                }
            }
            result
        });
    }

    let mut stats = ScanStats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(RegisterOutcome::Registered)) => stats.registered += 1,
            Ok(Ok(RegisterOutcome::Updated)) => stats.updated += 1,
            Ok(Ok(RegisterOutcome::Unchanged)) => stats.unchanged += 1,
            Ok(Ok(RegisterOutcome::Skipped(_))) => stats.skipped += 1,
            Ok(Err(_)) => stats.errors += 1,
            Err(e) => {
                warn!(error = %e, "registration task panicked");
                stats.errors += 1;
            }
        }
    }
    stats
}

//! Integration: full scan -> registration -> sweep -> upload, end to end
//! against the in-memory metadata gateway and blob backend.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

use casmir_core::types::UploadStatus;
use casmir_db::MemoryGateway;
use casmir_sync::{run_full_scan, Registrar, SharedPathMap, Uploader};

fn memory_operator() -> opendal::Operator {
    opendal::Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

struct Harness {
    gateway: Arc<MemoryGateway>,
    registrar: Arc<Registrar>,
    operator: opendal::Operator,
    root: TempDir,
}

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(MemoryGateway::new());
        let registrar = Arc::new(Registrar::new(
            gateway.clone(),
            SharedPathMap::new(),
            u64::MAX,
        ));
        Self {
            gateway,
            registrar,
            operator: memory_operator(),
            root: TempDir::new().unwrap(),
        }
    }

    async fn scan(&self) -> casmir_core::types::ScanStats {
        run_full_scan(
            self.gateway.clone(),
            self.registrar.clone(),
            &[self.root.path().to_path_buf()],
            4,
        )
        .await
    }

    async fn drain_uploads(&self) {
        let worker = Uploader::new(
            self.gateway.clone(),
            self.operator.clone(),
            &[self.root.path().to_path_buf()],
            5,
            u64::MAX,
            Arc::new(AtomicBool::new(true)),
        );
        while worker.drain_once().await.unwrap() > 0 {}
    }
}

#[tokio::test]
async fn empty_tree_scan_registers_nothing() {
    let h = Harness::new();
    let stats = h.scan().await;

    assert_eq!(stats.registered, 0);
    assert_eq!(stats.soft_deleted, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(h.gateway.file_count(), 0);
    assert_eq!(h.gateway.content_count(), 0);
}

#[tokio::test]
async fn single_file_registers_then_uploads() {
    let h = Harness::new();
    let path = h.root.path().join("a.txt");
    std::fs::write(&path, b"payload").unwrap();

    let stats = h.scan().await;
    assert_eq!(stats.registered, 1);

    let file = h.gateway.file(&posix(&path)).expect("file record");
    let hash = file.content_hash.clone().unwrap();
    assert!(file.deleted_at.is_none());

    let content = h.gateway.content(&hash).unwrap();
    assert_eq!(content.upload_status, UploadStatus::Pending);

    h.drain_uploads().await;
    let content = h.gateway.content(&hash).unwrap();
    assert_eq!(content.upload_status, UploadStatus::Uploaded);
    assert_eq!(content.storage_path.as_deref(), Some(hash.as_str()));
    assert_eq!(
        h.operator.read(&hash).await.unwrap().to_bytes().as_ref(),
        b"payload"
    );
}

#[tokio::test]
async fn rescan_of_unchanged_tree_is_idempotent() {
    let h = Harness::new();
    std::fs::write(h.root.path().join("a.txt"), b"stable").unwrap();

    let first = h.scan().await;
    assert_eq!(first.registered, 1);
    let before = h.gateway.file(&posix(&h.root.path().join("a.txt"))).unwrap();

    let second = h.scan().await;
    assert_eq!(second.registered, 0);
    assert_eq!(second.unchanged, 1);

    let after = h.gateway.file(&posix(&h.root.path().join("a.txt"))).unwrap();
    assert_eq!(after.content_hash, before.content_hash);
    assert!(after.last_seen_at >= before.last_seen_at);
    assert_eq!(h.gateway.file_count(), 1);
    assert_eq!(h.gateway.content_count(), 1);
}

#[tokio::test]
async fn vanished_file_is_soft_deleted_content_untouched() {
    let h = Harness::new();
    let path = h.root.path().join("a.txt");
    std::fs::write(&path, b"short-lived").unwrap();

    h.scan().await;
    let hash = h.gateway.file(&posix(&path)).unwrap().content_hash.unwrap();

    std::fs::remove_file(&path).unwrap();
    let stats = h.scan().await;
    assert_eq!(stats.soft_deleted, 1);

    let file = h.gateway.file(&posix(&path)).unwrap();
    assert!(file.deleted_at.is_some(), "record survives as soft-deleted");
    assert_eq!(
        h.gateway.content(&hash).unwrap().upload_status,
        UploadStatus::Pending,
        "content record is untouched by the sweep"
    );
}

#[tokio::test]
async fn rename_moves_path_without_reupload() {
    let h = Harness::new();
    let old = h.root.path().join("a.txt");
    let new = h.root.path().join("b.txt");
    std::fs::write(&old, b"same content either way").unwrap();

    h.scan().await;
    h.drain_uploads().await;
    let hash = h.gateway.file(&posix(&old)).unwrap().content_hash.unwrap();
    assert_eq!(h.gateway.content(&hash).unwrap().upload_status, UploadStatus::Uploaded);

    std::fs::rename(&old, &new).unwrap();
    let stats = h.scan().await;
    assert_eq!(stats.registered, 1, "new path registered");
    assert_eq!(stats.soft_deleted, 1, "old path swept");

    assert!(h.gateway.file(&posix(&old)).unwrap().deleted_at.is_some());
    let moved = h.gateway.file(&posix(&new)).unwrap();
    assert!(moved.deleted_at.is_none());
    assert_eq!(moved.content_hash.as_deref(), Some(hash.as_str()));

    // same digest: still uploaded, never re-queued
    let content = h.gateway.content(&hash).unwrap();
    assert_eq!(content.upload_status, UploadStatus::Uploaded);
    let worker = Uploader::new(
        h.gateway.clone(),
        h.operator.clone(),
        &[h.root.path().to_path_buf()],
        5,
        u64::MAX,
        Arc::new(AtomicBool::new(true)),
    );
    assert_eq!(worker.drain_once().await.unwrap(), 0, "nothing to upload");
}

#[tokio::test]
async fn duplicate_content_shares_one_content_record() {
    let h = Harness::new();
    std::fs::write(h.root.path().join("one.txt"), b"duplicated bytes").unwrap();
    std::fs::write(h.root.path().join("two.txt"), b"duplicated bytes").unwrap();

    let stats = h.scan().await;
    assert_eq!(stats.registered, 2);
    assert_eq!(h.gateway.file_count(), 2);
    assert_eq!(h.gateway.content_count(), 1);

    h.drain_uploads().await;
    let hash = h
        .gateway
        .file(&posix(&h.root.path().join("one.txt")))
        .unwrap()
        .content_hash
        .unwrap();
    assert_eq!(h.gateway.content(&hash).unwrap().upload_status, UploadStatus::Uploaded);
}

#[tokio::test]
async fn reappearing_path_is_resurrected() {
    let h = Harness::new();
    let path = h.root.path().join("phoenix.txt");
    std::fs::write(&path, b"rises again").unwrap();

    h.scan().await;
    std::fs::remove_file(&path).unwrap();
    h.scan().await;
    assert!(h.gateway.file(&posix(&path)).unwrap().deleted_at.is_some());

    std::fs::write(&path, b"rises again").unwrap();
    let stats = h.scan().await;
    // the soft-deleted row is invisible to the snapshot, so the path takes
    // the full registration route and comes back alive
    assert_eq!(stats.registered, 1);
    let file = h.gateway.file(&posix(&path)).unwrap();
    assert!(file.deleted_at.is_none());
    assert_eq!(h.gateway.content_count(), 1);
}

#[tokio::test]
async fn content_change_requeues_new_digest_only() {
    let h = Harness::new();
    let path = h.root.path().join("doc.txt");
    std::fs::write(&path, b"version one").unwrap();

    h.scan().await;
    h.drain_uploads().await;
    let old_hash = h.gateway.file(&posix(&path)).unwrap().content_hash.unwrap();

    std::fs::write(&path, b"version two").unwrap();
    let stats = h.scan().await;
    assert_eq!(stats.updated, 1);

    let new_hash = h.gateway.file(&posix(&path)).unwrap().content_hash.unwrap();
    assert_ne!(old_hash, new_hash);
    assert_eq!(h.gateway.content(&new_hash).unwrap().upload_status, UploadStatus::Pending);
    // the superseded digest keeps its uploaded state; GC is someone else's job
    assert_eq!(h.gateway.content(&old_hash).unwrap().upload_status, UploadStatus::Uploaded);

    h.drain_uploads().await;
    assert_eq!(h.gateway.content(&new_hash).unwrap().upload_status, UploadStatus::Uploaded);
}

#[tokio::test]
async fn scan_ignores_roots_that_do_not_exist() {
    let h = Harness::new();
    std::fs::write(h.root.path().join("real.txt"), b"real").unwrap();

    let stats = run_full_scan(
        h.gateway.clone(),
        h.registrar.clone(),
        &[
            h.root.path().to_path_buf(),
            std::path::PathBuf::from("/definitely/not/here"),
        ],
        4,
    )
    .await;

    assert_eq!(stats.registered, 1);
    assert_eq!(stats.errors, 0);
}

//! OS filesystem notifications -> debounced queue -> registrar.
//!
//! The notify callback only filters, translates, and drops the event
//! into the queue under a short-lived mutex; registration happens on a
//! separate processor task that polls the queue every 500 ms. Deletions
//! are deliberately not handled here; the reconciler's soft-delete
//! sweep owns them.

use notify::event::{CreateKind, EventKind as NotifyEventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use casmir_core::types::{EventKind, PendingEvent};
use casmir_core::{CasmirError, CasmirResult};

use crate::queue::EventQueue;
use crate::registrar::Registrar;

/// How often the processor drains the debounce queue
const PROCESS_INTERVAL: Duration = Duration::from_millis(500);

/// Glob-based ignore list, matched against the basename and the full
/// path, plus an unconditional rule for `.`-prefixed path components.
pub struct IgnoreFilter {
    // (basename pattern, full-path pattern) per configured glob
    compiled: Vec<(glob::Pattern, glob::Pattern)>,
}

impl IgnoreFilter {
    pub fn new(patterns: &[String]) -> Self {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let name = glob::Pattern::new(raw);
            let path = glob::Pattern::new(&format!("*{raw}"));
            match (name, path) {
                (Ok(n), Ok(p)) => compiled.push((n, p)),
                _ => warn!(pattern = %raw, "invalid ignore pattern, skipping"),
            }
        }
        Self { compiled }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if path
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .any(|name| name.starts_with('.'))
        {
            return true;
        }

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let full = crate::meta::path_to_posix(path);

        self.compiled
            .iter()
            .any(|(name_pat, path_pat)| name_pat.matches(&basename) || path_pat.matches(&full))
    }
}

/// Map one raw notify event into queue entries.
///
/// Directory events are dropped. A move whose destination is ignored is
/// dropped; one whose source is ignored but destination is not becomes a
/// `created` on the destination.
pub fn translate_event(event: notify::Event, filter: &IgnoreFilter, queue: &EventQueue) {
    match event.kind {
        NotifyEventKind::Create(CreateKind::Folder) => {}
        NotifyEventKind::Create(_) => {
            for path in event.paths {
                enqueue(queue, filter, path, EventKind::Created);
            }
        }
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if event.paths.len() == 2 {
                let dest = event.paths[1].clone();
                let src = event.paths[0].clone();
                if dest.is_dir() {
                    return;
                }
                let src_ignored = filter.is_ignored(&src);
                let dest_ignored = filter.is_ignored(&dest);
                if dest_ignored {
                    return;
                }
                if src_ignored {
                    // surfaced from an ignored location: a plain creation
                    enqueue(queue, filter, dest, EventKind::Created);
                } else {
                    debug!(src = %src.display(), dest = %dest.display(), "event: moved");
                    queue.add(PendingEvent::moved(src, dest));
                }
            }
        }
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in event.paths {
                enqueue(queue, filter, path, EventKind::Created);
            }
        }
        // Rename sources and removals: the reconciler sweep owns deletions
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => {}
        NotifyEventKind::Remove(_) => {}
        NotifyEventKind::Access(_) => {}
        NotifyEventKind::Modify(_) | NotifyEventKind::Any | NotifyEventKind::Other => {
            for path in event.paths {
                enqueue(queue, filter, path, EventKind::Modified);
            }
        }
    }
}

fn enqueue(queue: &EventQueue, filter: &IgnoreFilter, path: PathBuf, kind: EventKind) {
    if path.is_dir() || filter.is_ignored(&path) {
        return;
    }
    debug!(path = %path.display(), kind = ?kind, "event");
    queue.add(PendingEvent::new(path, kind));
}

/// The source root a path belongs to, if any
pub fn find_source_base<'a>(path: &Path, sources: &'a [PathBuf]) -> Option<&'a PathBuf> {
    sources.iter().find(|base| path.starts_with(base))
}

/// Register a batch of debounced events. Returns (processed, errors).
///
/// Targets that vanished since the event fired are dropped silently;
/// transient files are the usual cause, and the sweep cleans up if a
/// registered path really went away.
pub async fn process_ready_events(
    events: &[PendingEvent],
    registrar: &Registrar,
    sources: &[PathBuf],
) -> (usize, usize) {
    let mut processed = 0usize;
    let mut errors = 0usize;

    for event in events {
        let path = event.effective_path();
        let Ok(st) = std::fs::symlink_metadata(path) else {
            debug!(path = %path.display(), "target vanished, dropping event");
            continue;
        };
        if st.is_dir() {
            continue;
        }
        let Some(base) = find_source_base(path, sources) else {
            warn!(path = %path.display(), "event outside all source roots");
            continue;
        };

        match registrar.register(path, base).await {
            Ok(outcome) => {
                info!(path = %path.display(), action = outcome.label(), "event processed");
                processed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "event registration failed");
                errors += 1;
            }
        }
    }
    (processed, errors)
}

/// Recursive watcher over every source root plus the processor task.
pub struct FileWatcher {
    queue: Arc<EventQueue>,
    // Keeps the OS subscription alive; dropped on stop
    _watcher: RecommendedWatcher,
    processor: tokio::task::JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl FileWatcher {
    /// Subscribe to all existing source roots and start the processor.
    /// Roots that do not exist are warned about and skipped.
    pub fn start(
        sources: Vec<PathBuf>,
        ignore_patterns: &[String],
        debounce: Duration,
        registrar: Arc<Registrar>,
    ) -> CasmirResult<Self> {
        let queue = Arc::new(EventQueue::new(debounce));
        let filter = IgnoreFilter::new(ignore_patterns);

        let cb_queue = queue.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => translate_event(event, &filter, &cb_queue),
                Err(e) => warn!(error = %e, "watch error"),
            })
            .map_err(|e| CasmirError::Other(anyhow::anyhow!("creating file watcher: {e}")))?;

        let mut watched = 0usize;
        for source in &sources {
            if !source.exists() {
                warn!(path = %source.display(), "watch path does not exist, skipping");
                continue;
            }
            watcher
                .watch(source, RecursiveMode::Recursive)
                .map_err(|e| {
                    CasmirError::Other(anyhow::anyhow!("watching {}: {e}", source.display()))
                })?;
            info!(path = %source.display(), "watching");
            watched += 1;
        }

        let running = Arc::new(AtomicBool::new(true));
        let processor = tokio::spawn(process_loop(
            queue.clone(),
            registrar,
            sources,
            running.clone(),
        ));

        info!(roots = watched, debounce_secs = debounce.as_secs_f64(), "watcher started");
        Ok(Self {
            queue,
            _watcher: watcher,
            processor,
            running,
        })
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Stop the processor; in-flight registrations run to completion.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if tokio::time::timeout(Duration::from_secs(5), self.processor)
            .await
            .is_err()
        {
            warn!("watcher processor did not stop within 5s");
        }
        info!("watcher stopped");
    }
}

async fn process_loop(
    queue: Arc<EventQueue>,
    registrar: Arc<Registrar>,
    sources: Vec<PathBuf>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(PROCESS_INTERVAL).await;
        let ready = queue.get_ready();
        if ready.is_empty() {
            continue;
        }
        info!(
            count = ready.len(),
            pending = queue.pending_count(),
            "processing ready events"
        );
        process_ready_events(&ready, &registrar, &sources).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casmir_core::config::default_ignore_patterns;
    use casmir_db::MemoryGateway;
    use std::time::Instant;
    use tempfile::TempDir;

    fn default_filter() -> IgnoreFilter {
        IgnoreFilter::new(&default_ignore_patterns())
    }

    #[test]
    fn ignores_temp_and_system_files() {
        let filter = default_filter();
        assert!(filter.is_ignored(Path::new("/data/x/upload.tmp")));
        assert!(filter.is_ignored(Path::new("/data/x/movie.partial")));
        assert!(filter.is_ignored(Path::new("/data/.DS_Store")));
        assert!(filter.is_ignored(Path::new("/data/photos/Thumbs.db")));
        assert!(filter.is_ignored(Path::new("/data/@eaDir/SYNO_THUMB.jpg")));
        assert!(filter.is_ignored(Path::new("/data/#recycle/old.txt")));
    }

    #[test]
    fn ignores_any_hidden_component() {
        let filter = default_filter();
        assert!(filter.is_ignored(Path::new("/data/.git/config")));
        assert!(filter.is_ignored(Path::new("/data/a/.hidden")));
        assert!(!filter.is_ignored(Path::new("/data/visible/file.txt")));
    }

    #[test]
    fn custom_patterns_match_basenames() {
        let filter = IgnoreFilter::new(&["*.bak".to_string()]);
        assert!(filter.is_ignored(Path::new("/data/save.bak")));
        assert!(!filter.is_ignored(Path::new("/data/save.txt")));
    }

    #[test]
    fn find_source_base_picks_containing_root() {
        let sources = vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")];
        assert_eq!(
            find_source_base(Path::new("/srv/b/x/y.txt"), &sources),
            Some(&PathBuf::from("/srv/b"))
        );
        assert_eq!(find_source_base(Path::new("/elsewhere/y.txt"), &sources), None);
    }

    #[test]
    fn create_event_lands_in_queue() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("new.txt");
        std::fs::write(&file, b"x").unwrap();

        let queue = EventQueue::new(Duration::from_secs(0));
        let event = notify::Event::new(NotifyEventKind::Create(CreateKind::File))
            .add_path(file.clone());
        translate_event(event, &default_filter(), &queue);

        let ready = queue.get_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind, EventKind::Created);
        assert_eq!(ready[0].path, file);
    }

    #[test]
    fn ignored_create_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("upload.tmp");
        std::fs::write(&file, b"x").unwrap();

        let queue = EventQueue::new(Duration::from_secs(0));
        let event =
            notify::Event::new(NotifyEventKind::Create(CreateKind::File)).add_path(file);
        translate_event(event, &default_filter(), &queue);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn rename_from_ignored_source_becomes_created_on_dest() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("final.txt");
        std::fs::write(&dest, b"x").unwrap();

        let queue = EventQueue::new(Duration::from_secs(0));
        let event = notify::Event::new(NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(tmp.path().join("final.txt.partial"))
            .add_path(dest.clone());
        translate_event(event, &default_filter(), &queue);

        let ready = queue.get_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind, EventKind::Created);
        assert_eq!(ready[0].path, dest);
    }

    #[test]
    fn rename_to_ignored_dest_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let queue = EventQueue::new(Duration::from_secs(0));
        let event = notify::Event::new(NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(tmp.path().join("final.txt"))
            .add_path(tmp.path().join("final.txt.tmp"));
        translate_event(event, &default_filter(), &queue);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn plain_rename_is_enqueued_as_moved() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("old.txt");
        let dest = tmp.path().join("new.txt");
        std::fs::write(&dest, b"x").unwrap();

        let queue = EventQueue::new(Duration::from_secs(0));
        let event = notify::Event::new(NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(src.clone())
            .add_path(dest.clone());
        translate_event(event, &default_filter(), &queue);

        let ready = queue.get_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind, EventKind::Moved);
        assert_eq!(ready[0].path, src);
        assert_eq!(ready[0].dest_path, Some(dest));
    }

    #[test]
    fn remove_events_are_dropped() {
        let queue = EventQueue::new(Duration::from_secs(0));
        let event = notify::Event::new(NotifyEventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/data/gone.txt"));
        translate_event(event, &default_filter(), &queue);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn ready_batch_registers_each_path_once() {
        let gw = Arc::new(MemoryGateway::new());
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("x.log");
        std::fs::write(&file, b"log line").unwrap();

        let registrar = Registrar::new(gw.clone(), crate::registrar::SharedPathMap::new(), u64::MAX);
        let sources = vec![tmp.path().to_path_buf()];

        // burst collapsed by the queue to one event
        let mut event = PendingEvent::new(file.clone(), EventKind::Modified);
        event.timestamp = Instant::now();
        let (processed, errors) = process_ready_events(&[event], &registrar, &sources).await;
        assert_eq!((processed, errors), (1, 0));
        assert_eq!(gw.file_count(), 1);
    }

    #[tokio::test]
    async fn vanished_target_is_dropped_without_error() {
        let gw = Arc::new(MemoryGateway::new());
        let tmp = TempDir::new().unwrap();
        let registrar = Registrar::new(gw.clone(), crate::registrar::SharedPathMap::new(), u64::MAX);
        let sources = vec![tmp.path().to_path_buf()];

        let event = PendingEvent::new(tmp.path().join("transient.txt"), EventKind::Created);
        let (processed, errors) = process_ready_events(&[event], &registrar, &sources).await;
        assert_eq!((processed, errors), (0, 0));
        assert_eq!(gw.file_count(), 0);
    }

    #[tokio::test]
    async fn moved_event_registers_destination() {
        let gw = Arc::new(MemoryGateway::new());
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("b.txt");
        std::fs::write(&dest, b"renamed content").unwrap();

        let registrar = Registrar::new(gw.clone(), crate::registrar::SharedPathMap::new(), u64::MAX);
        let sources = vec![tmp.path().to_path_buf()];

        let event = PendingEvent::moved(tmp.path().join("a.txt"), dest.clone());
        process_ready_events(&[event], &registrar, &sources).await;

        assert!(gw.file(&crate::meta::path_to_posix(&dest)).is_some());
        assert_eq!(gw.file_count(), 1);
    }
}

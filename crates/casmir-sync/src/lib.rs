//! casmir-sync: the reconciliation and upload engine
//!
//! Paths flow in from two directions, the notify-based [`watcher`] and
//! the periodic full-tree [`scanner`], and meet in the [`registrar`],
//! which hashes content and writes `files`/`file_contents` rows through
//! the metadata gateway. New digests land in the upload queue, which the
//! [`uploader`] drains into the blob store.

pub mod hash;
pub mod meta;
pub mod queue;
pub mod registrar;
pub mod sanitize;
pub mod scanner;
pub mod uploader;
pub mod watcher;

pub use queue::EventQueue;
pub use registrar::{RegisterOutcome, Registrar, SharedPathMap};
pub use scanner::run_full_scan;
pub use uploader::Uploader;
pub use watcher::FileWatcher;

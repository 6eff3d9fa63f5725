//! Filesystem attribute extraction and MIME inference.
//!
//! All stat calls are non-following (`symlink_metadata`), so a dangling
//! symlink yields a record instead of faulting the pipeline. MIME type
//! comes from the filename extension only, no magic-byte sniffing.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::path::Path;

use casmir_core::{CasmirError, CasmirResult};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Everything the registrar needs to build a file record
#[derive(Debug, Clone)]
pub struct ExtractedMetadata {
    pub filename: String,
    pub folder_path: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub fs_created_at: Option<DateTime<Utc>>,
    pub fs_modified_at: Option<DateTime<Utc>>,
    pub fs_inode: Option<u64>,
    pub fs_attributes: serde_json::Value,
    pub auto_metadata: serde_json::Value,
}

/// A path as the canonical POSIX-form string used for `full_path`
pub fn path_to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// MIME type from the filename extension, if recognizable
pub fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

/// Derive `folder_path`: the source base's final name component plus the
/// file's directory relative to the base. A file directly under the base
/// gets the base name alone.
pub fn folder_path_for(path: &Path, source_base: &Path) -> String {
    let base_name = source_base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match path.parent().and_then(|p| p.strip_prefix(source_base).ok()) {
        Some(rel) if rel.as_os_str().is_empty() => base_name,
        Some(rel) => format!("{base_name}/{}", path_to_posix(rel)),
        // Outside the base (shouldn't happen in practice): fall back to
        // the literal parent directory
        None => path
            .parent()
            .map(path_to_posix)
            .unwrap_or_default(),
    }
}

fn timestamp(secs: i64, nanos: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, nanos.clamp(0, 999_999_999) as u32).single()
}

/// Extract attributes for `path` relative to its source base.
pub fn extract_metadata(path: &Path, source_base: &Path) -> CasmirResult<ExtractedMetadata> {
    let st = std::fs::symlink_metadata(path)
        .map_err(|e| CasmirError::Stat(format!("stat {}: {e}", path.display())))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    let mime_type = guess_mime(path);

    #[cfg(unix)]
    let (fs_created_at, fs_modified_at, fs_inode, fs_attributes) = {
        let mode_octal = format!("{:03o}", st.mode() & 0o777);
        (
            timestamp(st.ctime(), st.ctime_nsec()),
            timestamp(st.mtime(), st.mtime_nsec()),
            Some(st.ino()),
            json!({
                "size_bytes": st.len(),
                "nlinks": st.nlink(),
                "uid": st.uid(),
                "gid": st.gid(),
                "device": st.dev(),
                "mode_octal": mode_octal,
                "is_symlink": st.file_type().is_symlink(),
            }),
        )
    };

    #[cfg(not(unix))]
    let (fs_created_at, fs_modified_at, fs_inode, fs_attributes) = {
        let to_utc = |t: std::io::Result<std::time::SystemTime>| {
            t.ok().map(DateTime::<Utc>::from)
        };
        (
            to_utc(st.created()),
            to_utc(st.modified()),
            None,
            json!({
                "size_bytes": st.len(),
                "is_symlink": st.file_type().is_symlink(),
            }),
        )
    };

    let auto_metadata = json!({
        "mime_type": mime_type,
        "extension": extension,
        "original_filename": filename,
        "source_path": path_to_posix(path),
        "source_base": path_to_posix(source_base),
    });

    Ok(ExtractedMetadata {
        filename,
        folder_path: folder_path_for(path, source_base),
        size_bytes: st.len(),
        mime_type,
        fs_created_at,
        fs_modified_at,
        fs_inode,
        fs_attributes,
        auto_metadata,
    })
}

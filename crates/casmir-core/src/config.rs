use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CasmirError, CasmirResult};

/// Registration-time size gate: files above this never enter the queue
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Upload-time size gate: blobs above this are marked skipped
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024; // 100 MiB

/// Top-level daemon configuration, populated from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory roots to mirror (SYNC_SOURCE_PATHS, comma-separated)
    pub source_paths: Vec<PathBuf>,
    /// Parallelism of the scan pool (SYNC_WORKERS)
    pub workers: usize,
    /// Event coalescing window in seconds (DEBOUNCE_SECONDS)
    pub debounce_seconds: f64,
    /// Glob patterns excluded from watching and scanning (IGNORE_PATTERNS)
    pub ignore_patterns: Vec<String>,
    /// Local hour-of-day for the daily full scan (FULL_SCAN_HOUR, 0-23)
    pub full_scan_hour: Option<u32>,
    /// Run a full scan immediately on startup (FULL_SCAN_ON_STARTUP)
    pub full_scan_on_startup: bool,
    /// IANA timezone for the hour comparison (TIMEZONE)
    pub timezone: String,

    /// Metadata store base URL (METADATA_API_URL)
    pub metadata_api_url: String,
    /// Shared secret sent as X-API-Key (METADATA_API_KEY)
    pub metadata_api_key: String,

    /// S3-compatible endpoint (S3_ENDPOINT)
    pub s3_endpoint: String,
    /// S3 region (S3_REGION)
    pub s3_region: String,
    /// Target bucket (S3_BUCKET)
    pub s3_bucket: String,
    /// S3 credentials (AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY)
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,

    /// Registration-time size limit in bytes
    pub max_file_size_bytes: u64,
    /// Upload-time size limit in bytes
    pub max_upload_size_bytes: u64,
    /// Rows claimed per dequeue round
    pub upload_batch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_paths: Vec::new(),
            workers: 6,
            debounce_seconds: 3.0,
            ignore_patterns: default_ignore_patterns(),
            full_scan_hour: None,
            full_scan_on_startup: false,
            timezone: "UTC".into(),
            metadata_api_url: String::new(),
            metadata_api_key: String::new(),
            s3_endpoint: String::new(),
            s3_region: "us-east-1".into(),
            s3_bucket: "files".into(),
            s3_access_key_id: String::new(),
            s3_secret_access_key: String::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            max_upload_size_bytes: DEFAULT_MAX_UPLOAD_SIZE,
            upload_batch_size: 5,
        }
    }
}

/// Patterns excluded by default: editor droppings, NAS system trees
pub fn default_ignore_patterns() -> Vec<String> {
    [
        "*.tmp",
        "*.partial",
        ".DS_Store",
        "Thumbs.db",
        "@eaDir/*",
        "#recycle/*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Split a SYNC_SOURCE_PATHS value into roots, dropping empty entries
pub fn parse_source_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

impl Config {
    /// Check every startup requirement at once and report all failures
    /// together, so a misconfigured deployment surfaces in one message.
    pub fn validate(&self) -> CasmirResult<()> {
        let mut errors = Vec::new();

        if self.source_paths.is_empty() {
            errors.push("SYNC_SOURCE_PATHS is required (comma-separated absolute paths)".into());
        }
        for p in &self.source_paths {
            if !p.is_absolute() {
                errors.push(format!("source path is not absolute: {}", p.display()));
            }
        }
        if self.metadata_api_url.is_empty() {
            errors.push("METADATA_API_URL is required".into());
        }
        if self.metadata_api_key.is_empty() {
            errors.push("METADATA_API_KEY is required".into());
        }
        if self.s3_endpoint.is_empty() {
            errors.push("S3_ENDPOINT is required".into());
        }
        if let Some(hour) = self.full_scan_hour {
            if hour > 23 {
                errors.push(format!("FULL_SCAN_HOUR must be 0-23, got {hour}"));
            }
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(format!("TIMEZONE is not a known IANA zone: {}", self.timezone));
        }
        if self.workers == 0 {
            errors.push("SYNC_WORKERS must be at least 1".into());
        }
        if !(self.debounce_seconds > 0.0) {
            errors.push("DEBOUNCE_SECONDS must be positive".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CasmirError::Config(errors.join("; ")))
        }
    }

    /// The configured timezone, already validated
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            source_paths: vec![PathBuf::from("/srv/data")],
            metadata_api_url: "https://meta.example.com".into(),
            metadata_api_key: "secret".into(),
            s3_endpoint: "https://s3.example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_everything_reports_all_errors() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("SYNC_SOURCE_PATHS"));
        assert!(err.contains("METADATA_API_URL"));
        assert!(err.contains("METADATA_API_KEY"));
        assert!(err.contains("S3_ENDPOINT"));
    }

    #[test]
    fn scan_hour_out_of_range_rejected() {
        let cfg = Config {
            full_scan_hour: Some(24),
            ..valid_config()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("FULL_SCAN_HOUR"));
    }

    #[test]
    fn unknown_timezone_rejected() {
        let cfg = Config {
            timezone: "Mars/Olympus_Mons".into(),
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relative_source_path_rejected() {
        let cfg = Config {
            source_paths: vec![PathBuf::from("data")],
            ..valid_config()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("not absolute"));
    }

    #[test]
    fn parse_source_paths_trims_and_drops_empties() {
        let paths = parse_source_paths(" /a , /b/c ,, ");
        assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b/c")]);
        assert!(parse_source_paths("").is_empty());
    }

    #[test]
    fn timezone_accessor_parses_known_zone() {
        let cfg = Config {
            timezone: "Europe/Berlin".into(),
            ..valid_config()
        };
        assert_eq!(cfg.tz(), chrono_tz::Europe::Berlin);
    }
}

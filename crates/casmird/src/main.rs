//! casmird: content-addressable file sync daemon
//!
//! Usage:
//!   casmird [--once]
//!
//! Configuration is environment-driven (SYNC_SOURCE_PATHS,
//! METADATA_API_URL, S3_BUCKET, ...); every variable is also available
//! as a CLI flag. `--once` runs a single full scan and exits.

mod daemon;
mod metrics;

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use tracing::{error, info};

use casmir_core::config::{self, Config};

#[derive(Parser, Debug)]
#[command(name = "casmird", version, about = "content-addressable file sync daemon")]
struct Cli {
    /// Comma-separated directory roots to mirror
    #[arg(long, env = "SYNC_SOURCE_PATHS", default_value = "")]
    source_paths: String,

    /// Parallelism of the scan pool
    #[arg(long, env = "SYNC_WORKERS", default_value_t = 6)]
    workers: usize,

    /// Event coalescing window in seconds
    #[arg(long, env = "DEBOUNCE_SECONDS", default_value_t = 3.0)]
    debounce_seconds: f64,

    /// Comma-separated ignore globs (replaces the built-in set)
    #[arg(long, env = "IGNORE_PATTERNS")]
    ignore_patterns: Option<String>,

    /// Local hour-of-day (0-23) for the daily full scan
    #[arg(long, env = "FULL_SCAN_HOUR")]
    full_scan_hour: Option<u32>,

    /// Run a full scan immediately on startup
    #[arg(long, env = "FULL_SCAN_ON_STARTUP", default_value_t = false)]
    full_scan_on_startup: bool,

    /// IANA timezone for the daily-scan hour comparison
    #[arg(long, env = "TIMEZONE", default_value = "UTC")]
    timezone: String,

    /// Metadata store base URL
    #[arg(long, env = "METADATA_API_URL", default_value = "")]
    metadata_api_url: String,

    /// Shared secret sent as X-API-Key
    #[arg(long, env = "METADATA_API_KEY", default_value = "", hide_env_values = true)]
    metadata_api_key: String,

    /// S3-compatible endpoint
    #[arg(long, env = "S3_ENDPOINT", default_value = "")]
    s3_endpoint: String,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    s3_region: String,

    #[arg(long, env = "S3_BUCKET", default_value = "files")]
    s3_bucket: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", default_value = "", hide_env_values = true)]
    s3_access_key_id: String,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
    s3_secret_access_key: String,

    /// Run one full scan, then exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CASMIR_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "CASMIR_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Prometheus metrics + health endpoint; empty string disables
    #[arg(long, env = "CASMIR_METRICS_ADDR", default_value = "127.0.0.1:9100")]
    metrics_addr: String,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl Cli {
    fn into_config(self) -> (Config, daemon::Options) {
        let config = Config {
            source_paths: config::parse_source_paths(&self.source_paths),
            workers: self.workers,
            debounce_seconds: self.debounce_seconds,
            ignore_patterns: match self.ignore_patterns.as_deref() {
                Some(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => config::default_ignore_patterns(),
            },
            full_scan_hour: self.full_scan_hour,
            full_scan_on_startup: self.full_scan_on_startup,
            timezone: self.timezone,
            metadata_api_url: self.metadata_api_url,
            metadata_api_key: self.metadata_api_key,
            s3_endpoint: self.s3_endpoint,
            s3_region: self.s3_region,
            s3_bucket: self.s3_bucket,
            s3_access_key_id: self.s3_access_key_id,
            s3_secret_access_key: self.s3_secret_access_key,
            ..Default::default()
        };
        let options = daemon::Options {
            once: self.once,
            metrics_addr: if self.metrics_addr.is_empty() {
                None
            } else {
                Some(self.metrics_addr)
            },
        };
        (config, options)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let (config, options) = cli.into_config();
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::from(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        sources = config.source_paths.len(),
        bucket = %config.s3_bucket,
        "casmird starting"
    );

    match daemon::run(config, options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

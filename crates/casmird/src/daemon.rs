//! Daemon lifecycle: startup, background services, supervision loop,
//! graceful shutdown.
//!
//! The uploader runs under a restart supervisor; the watcher feeds the
//! registrar continuously; once per minute the loop checks whether the
//! configured local scan hour has arrived and a scan has not yet run
//! today. SIGINT/SIGTERM stop everything with a bounded join.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use casmir_core::config::Config;
use casmir_core::types::ScanStats;
use casmir_db::{MetadataGateway, RestGateway};
use casmir_sync::{run_full_scan, FileWatcher, Registrar, SharedPathMap, Uploader};

use crate::metrics;

/// Delay before restarting a crashed upload worker
const UPLOADER_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Bound on joining background services at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Options {
    pub once: bool,
    pub metrics_addr: Option<String>,
}

/// At-most-daily scan gate: fires when the local hour matches and the
/// last completed scan was on an earlier date. The inner lock keeps two
/// scans from ever overlapping.
pub struct ScanScheduler {
    full_scan_hour: Option<u32>,
    lock: tokio::sync::Mutex<()>,
    last_scan_date: std::sync::Mutex<Option<NaiveDate>>,
}

impl ScanScheduler {
    pub fn new(full_scan_hour: Option<u32>) -> Self {
        Self {
            full_scan_hour,
            lock: tokio::sync::Mutex::new(()),
            last_scan_date: std::sync::Mutex::new(None),
        }
    }

    pub fn is_due<Tz: chrono::TimeZone>(&self, now_local: DateTime<Tz>) -> bool {
        let Some(hour) = self.full_scan_hour else {
            return false;
        };
        if now_local.hour() != hour {
            return false;
        }
        *self.last_scan_date.lock().unwrap() != Some(now_local.date_naive())
    }

    pub fn mark_ran(&self, date: NaiveDate) {
        *self.last_scan_date.lock().unwrap() = Some(date);
    }

    /// Run a scan unless one is already in flight.
    pub async fn run_guarded(
        &self,
        gateway: Arc<dyn MetadataGateway>,
        registrar: Arc<Registrar>,
        config: &Config,
    ) -> Option<ScanStats> {
        let Ok(_guard) = self.lock.try_lock() else {
            warn!("scan requested while another scan is running, skipping");
            return None;
        };
        let stats = run_full_scan(gateway, registrar, &config.source_paths, config.workers).await;
        Some(stats)
    }
}

pub async fn run(config: Config, options: Options) -> Result<()> {
    let config = Arc::new(config);

    let gateway: Arc<dyn MetadataGateway> = Arc::new(
        RestGateway::new(&config.metadata_api_url, &config.metadata_api_key)
            .context("building metadata gateway")?,
    );
    let operator = casmir_storage::build_operator(&config).context("building storage operator")?;

    match casmir_storage::check_health(&operator).await {
        Ok(()) => info!(endpoint = %config.s3_endpoint, "object store: connected"),
        // Keep going: the retry layer and the upload queue absorb a slow start
        Err(e) => warn!(endpoint = %config.s3_endpoint, "object store: {e}"),
    }

    let registrar = Arc::new(Registrar::new(
        gateway.clone(),
        SharedPathMap::new(),
        config.max_file_size_bytes,
    ));
    let scheduler = ScanScheduler::new(config.full_scan_hour);

    if options.once {
        let stats = scheduler
            .run_guarded(gateway.clone(), registrar.clone(), &config)
            .await
            .expect("no concurrent scan at startup");
        info!(
            registered = stats.registered,
            updated = stats.updated,
            unchanged = stats.unchanged,
            soft_deleted = stats.soft_deleted,
            errors = stats.errors,
            "single scan finished"
        );
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));

    // Metrics + health endpoint
    let mut registry = metrics::Registry::default();
    let sync_metrics = metrics::SyncMetrics::new(&mut registry);
    if let Some(addr) = options.metrics_addr.clone() {
        let state = metrics::HealthState {
            registry: Arc::new(registry),
            operator: operator.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // Upload worker under a restart supervisor
    let uploader_handle = tokio::spawn(supervise_uploader(
        gateway.clone(),
        operator.clone(),
        config.clone(),
        running.clone(),
    ));

    // Watcher feeds the registrar continuously
    let watcher = FileWatcher::start(
        config.source_paths.clone(),
        &config.ignore_patterns,
        Duration::from_secs_f64(config.debounce_seconds),
        registrar.clone(),
    )?;

    let tz = config.tz();
    if config.full_scan_on_startup {
        if let Some(stats) = scheduler
            .run_guarded(gateway.clone(), registrar.clone(), &config)
            .await
        {
            sync_metrics.record_scan(&stats);
            scheduler.mark_ran(Utc::now().with_timezone(&tz).date_naive());
        }
    }

    // Supervision loop: minute ticks + signals
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let now_local = Utc::now().with_timezone(&tz);
                if scheduler.is_due(now_local) {
                    info!(hour = now_local.hour(), date = %now_local.date_naive(), "daily scan due");
                    if let Some(stats) = scheduler
                        .run_guarded(gateway.clone(), registrar.clone(), &config)
                        .await
                    {
                        sync_metrics.record_scan(&stats);
                        scheduler.mark_ran(now_local.date_naive());
                    }
                }
            }
        }
    }

    // Graceful stop: flag first, then bounded joins
    running.store(false, Ordering::SeqCst);
    watcher.stop().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, uploader_handle)
        .await
        .is_err()
    {
        warn!("upload worker did not stop within {}s", SHUTDOWN_TIMEOUT.as_secs());
    }

    info!("casmird stopped");
    Ok(())
}

/// Keep the upload worker alive: a panic restarts it after a delay, a
/// clean return (shutdown) ends supervision.
async fn supervise_uploader(
    gateway: Arc<dyn MetadataGateway>,
    operator: opendal::Operator,
    config: Arc<Config>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let worker = Uploader::new(
            gateway.clone(),
            operator.clone(),
            &config.source_paths,
            config.upload_batch_size,
            config.max_upload_size_bytes,
            running.clone(),
        );
        let handle = tokio::spawn(async move { worker.run().await });
        match handle.await {
            Ok(()) => break, // clean stop
            Err(e) => {
                error!(error = %e, "upload worker crashed, restarting");
                tokio::time::sleep(UPLOADER_RESTART_DELAY).await;
            }
        }
    }
}

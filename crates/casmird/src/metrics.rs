//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (always 200 if process is running)
//!   GET /readyz   — Readiness probe (200 if the object store is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry as PRegistry;
use std::sync::Arc;

use casmir_core::types::ScanStats;

pub type Registry = PRegistry;

/// Counters fed from scan results in the supervision loop
#[derive(Clone)]
pub struct SyncMetrics {
    scans_completed: Counter,
    files_registered: Counter,
    files_soft_deleted: Counter,
    scan_errors: Counter,
}

impl SyncMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let scans_completed = Counter::default();
        let files_registered = Counter::default();
        let files_soft_deleted = Counter::default();
        let scan_errors = Counter::default();

        registry.register(
            "casmir_scans_completed",
            "Full scans completed",
            scans_completed.clone(),
        );
        registry.register(
            "casmir_files_registered",
            "File records created or updated by scans",
            files_registered.clone(),
        );
        registry.register(
            "casmir_files_soft_deleted",
            "File records soft-deleted by scan sweeps",
            files_soft_deleted.clone(),
        );
        registry.register(
            "casmir_scan_errors",
            "Per-file errors across all scans",
            scan_errors.clone(),
        );

        Self {
            scans_completed,
            files_registered,
            files_soft_deleted,
            scan_errors,
        }
    }

    pub fn record_scan(&self, stats: &ScanStats) {
        self.scans_completed.inc();
        self.files_registered.inc_by(stats.registered + stats.updated);
        self.files_soft_deleted.inc_by(stats.soft_deleted);
        self.scan_errors.inc_by(stats.errors);
    }
}

/// Shared state for the health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: opendal::Operator,
}

/// Serve metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if the object store is reachable.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match casmir_storage::check_health(&state.operator).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable"),
    }
}

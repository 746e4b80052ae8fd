//! The operational HTTP surface: a plaintext health summary and a manual-sweep trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use log::info;
use tokio::sync::{mpsc, watch};

use crate::error::AssignError;
use crate::nested;
use crate::service::metrics::{Metrics, MetricsSnapshot};

/// A completed run older than this marks the service stale.
const STALE_AFTER_MINUTES: i64 = 15;

pub struct OpsState {
    pub metrics: Arc<Metrics>,
    pub manual_trigger: mpsc::Sender<()>,
}

/// Renders the health verdict and body for a snapshot. Pure; the HTTP handler supplies the
/// clock.
pub fn render_health(snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> (u16, String) {
    let stale = snapshot
        .last_run
        .map(|last_run| now - last_run > Duration::minutes(STALE_AFTER_MINUTES))
        .unwrap_or(false);

    let status = if stale { "stale" } else { "ok" };
    let last_run = snapshot
        .last_run
        .map(|last_run| last_run.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    let body = format!(
        "{} orgs={} prs_seen={} prs_modified={} last_run={} runs={}\n",
        status,
        snapshot.orgs_seen,
        snapshot.prs_seen,
        snapshot.prs_modified,
        last_run,
        snapshot.total_runs
    );

    (if stale { 503 } else { 200 }, body)
}

async fn health(State(state): State<Arc<OpsState>>) -> (StatusCode, String) {
    let (code, body) = render_health(&state.metrics.snapshot(), Utc::now());
    (StatusCode::from_u16(code).unwrap_or(StatusCode::OK), body)
}

async fn poll(State(state): State<Arc<OpsState>>) -> (StatusCode, String) {
    if state.metrics.polling_in_progress() {
        return (StatusCode::CONFLICT, "busy\n".to_string());
    }

    match state.manual_trigger.try_send(()) {
        Ok(()) => (StatusCode::ACCEPTED, "accepted\n".to_string()),
        Err(_) => (StatusCode::CONFLICT, "busy\n".to_string()),
    }
}

/// Serves the operational endpoints until `shutdown` fires.
pub async fn serve(
    state: Arc<OpsState>, port: u16, mut shutdown: watch::Receiver<bool>,
) -> Result<(), AssignError> {
    let app = Router::new()
        .route("/_-_/health", get(health))
        .route("/_-_/poll", get(poll))
        .with_state(state);

    let address = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(address).await.map_err(|e| {
        AssignError::ConfigError(format!("Could not bind the HTTP surface on [{}]: {}", address, e))
    })?;

    info!("Operational HTTP surface listening on [{}].", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| AssignError::Other(nested!(e)))
}

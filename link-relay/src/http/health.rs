//! Health check endpoint.

use crate::server::LoveRelay;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `"ok"`, or `"degraded"` when the database does not answer.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of live connections.
    pub connections: usize,
    /// Whether the database answered a ping.
    pub database: bool,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler. Answers 503 when the database is unreachable.
pub async fn health_handler(
    Extension(relay): Extension<Arc<LoveRelay>>,
) -> (StatusCode, Json<HealthStatus>) {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let database = match relay.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Health check: database unreachable");
            false
        }
    };

    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections: relay.registry().connection_count().await,
            database,
            uptime_seconds: uptime,
        }),
    )
}

//! HTTP endpoints for heartlink-relay.
//!
//! The JSON API, the live channel upgrade, health checks and metrics all
//! share one router. Relay state reaches handlers through an `Extension`.

mod api;
pub mod auth;
pub mod health;
mod metrics;
mod ws;

use crate::server::LoveRelay;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub use auth::{Caller, HeaderIdentity, IdentityResolver};
pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<LoveRelay>) -> Router {
    Router::new()
        .route("/pairs/request", post(api::create_request))
        .route("/pairs/respond", post(api::respond))
        .route("/pairs/requests", get(api::list_requests))
        .route(
            "/pairs/current",
            get(api::current_pair).delete(api::dissolve_current),
        )
        .route("/love/send", post(api::send_love))
        .route("/love/history", get(api::history))
        .route("/stats", get(api::stats))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

//! Prometheus metrics endpoint.

use crate::server::LoveRelay;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges reflect current state, counters are monotonic since startup.
/// Answers 404 when `server.metrics_enabled` is off.
pub async fn metrics_handler(Extension(relay): Extension<Arc<LoveRelay>>) -> Response {
    if !relay.config().server.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let m = relay.metrics();

    let connections = relay.registry().connection_count().await;
    let evictions = relay.registry().evictions();
    let limiter_keys = relay.rate_limits().tracked_keys();

    let love_events = m.love_events_total.load(Ordering::Relaxed);
    let live_deliveries = m.live_deliveries_total.load(Ordering::Relaxed);
    let live_misses = m.live_misses_total.load(Ordering::Relaxed);
    let notifications = m.notifications_enqueued_total.load(Ordering::Relaxed);
    let pair_requests = m.pair_requests_total.load(Ordering::Relaxed);
    let pairs_formed = m.pairs_formed_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let conns_total = m.connections_total.load(Ordering::Relaxed);

    // Store counts are best effort.
    let counts = relay.store().counts().await.unwrap_or_default();

    let body = format!(
        r#"# HELP heartlink_connections_active Number of live connections
# TYPE heartlink_connections_active gauge
heartlink_connections_active {connections}

# HELP heartlink_info Server information
# TYPE heartlink_info gauge
heartlink_info{{version="{version}"}} 1

# HELP heartlink_rate_limit_keys Keys tracked by the per-user rate limiters
# TYPE heartlink_rate_limit_keys gauge
heartlink_rate_limit_keys {limiter_keys}

# HELP heartlink_users Registered users
# TYPE heartlink_users gauge
heartlink_users {users}

# HELP heartlink_pairs_active Pairs that have not been dissolved
# TYPE heartlink_pairs_active gauge
heartlink_pairs_active {active_pairs}

# HELP heartlink_love_events_stored Love events in the database
# TYPE heartlink_love_events_stored gauge
heartlink_love_events_stored {stored_events}

# HELP heartlink_love_events_total Love events sent since startup
# TYPE heartlink_love_events_total counter
heartlink_love_events_total {love_events}

# HELP heartlink_live_deliveries_total Love events queued on a live connection
# TYPE heartlink_live_deliveries_total counter
heartlink_live_deliveries_total {live_deliveries}

# HELP heartlink_live_misses_total Love events whose partner was offline
# TYPE heartlink_live_misses_total counter
heartlink_live_misses_total {live_misses}

# HELP heartlink_evictions_total Live connections evicted for a full buffer
# TYPE heartlink_evictions_total counter
heartlink_evictions_total {evictions}

# HELP heartlink_notifications_total Push notifications enqueued
# TYPE heartlink_notifications_total counter
heartlink_notifications_total {notifications}

# HELP heartlink_pair_requests_total Pair requests created
# TYPE heartlink_pair_requests_total counter
heartlink_pair_requests_total {pair_requests}

# HELP heartlink_pairs_formed_total Pairs formed
# TYPE heartlink_pairs_formed_total counter
heartlink_pairs_formed_total {pairs_formed}

# HELP heartlink_connections_total Live connections accepted
# TYPE heartlink_connections_total counter
heartlink_connections_total {conns_total}

# HELP heartlink_rate_limit_hits_total Requests refused by a rate limiter
# TYPE heartlink_rate_limit_hits_total counter
heartlink_rate_limit_hits_total {rate_limits}

# HELP heartlink_errors_total Requests that failed with an internal error
# TYPE heartlink_errors_total counter
heartlink_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
        users = counts.users,
        active_pairs = counts.active_pairs,
        stored_events = counts.love_events,
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

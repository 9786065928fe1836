//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::handlers::{addrs, health};
use crate::metrics::metrics_middleware;
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        // Spawn: admit new verified addresses
        .route("/spawn", get(addrs::spawn))
        .route("/spawns", get(addrs::spawns))
        // Lease: pick and report per-tenant
        .route("/pick", get(addrs::pick))
        .route("/picks", get(addrs::picks))
        .route("/report", post(addrs::report))
        .route("/reports", post(addrs::reports))
        // Ad-hoc reachability checks
        .route("/check", get(addrs::check))
        .route("/checks", get(addrs::checks))
        // Introspection and persistence
        .route("/stats", get(addrs::stats))
        .route("/save", post(addrs::save))
        .route("/flush", post(addrs::flush));

    let health_routes = Router::new().route("/health", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

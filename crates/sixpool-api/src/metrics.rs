//! Prometheus metrics for the pool server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "sixpool_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sixpool_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "sixpool_http_requests_in_flight";

    // Pool metrics
    pub const POOL_SIZE: &str = "sixpool_pool_size";
    pub const SPAWN_ATTEMPTS_TOTAL: &str = "sixpool_spawn_attempts_total";
    pub const ADDRS_SPAWNED_TOTAL: &str = "sixpool_addrs_spawned_total";
    pub const PICKS_TOTAL: &str = "sixpool_picks_total";
    pub const REPORTS_TOTAL: &str = "sixpool_reports_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Update the global-pool size gauge.
pub fn set_pool_size(size: usize) {
    gauge!(names::POOL_SIZE).set(size as f64);
}

/// Record one reachability probe issued by the spawn path.
pub fn record_spawn_attempt() {
    counter!(names::SPAWN_ATTEMPTS_TOTAL).increment(1);
}

/// Record an address admitted to the global pool.
pub fn record_addr_spawned() {
    counter!(names::ADDRS_SPAWNED_TOTAL).increment(1);
}

/// Record a pick, labeled by whether an address was granted.
pub fn record_pick(granted: bool) {
    let labels = [("granted", granted.to_string())];
    counter!(names::PICKS_TOTAL, &labels).increment(1);
}

/// Record a client status report.
pub fn record_report(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::REPORTS_TOTAL, &labels).increment(1);
}

/// Metrics middleware for HTTP requests.
///
/// The API surface is a fixed set of paths, so the raw path is a safe
/// low-cardinality label.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

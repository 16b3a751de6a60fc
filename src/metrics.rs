/// Metrics for the account resolver
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - JWT uploads and fetches by outcome
/// - Update notifications published to the bus
/// - Directory watcher reconciliation

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter_vec, Encoder, Gauge, IntCounterVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    /// Process start, used for the uptime gauge
    static ref STARTED_AT: Instant = Instant::now();

    // ========== Resolver Metrics ==========

    /// JWT uploads by token kind and outcome
    pub static ref JWT_UPLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_jwt_uploads_total",
        "Total number of JWT uploads",
        &["kind", "outcome"]
    )
    .unwrap();

    /// JWT fetches by token kind and outcome
    pub static ref JWT_FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_jwt_fetches_total",
        "Total number of JWT fetches",
        &["kind", "outcome"]
    )
    .unwrap();

    // ========== Notification Metrics ==========

    /// Update notifications by status
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_notifications_total",
        "Total number of account update notifications",
        &["status"]
    )
    .unwrap();

    // ========== Store Metrics ==========

    /// Watcher reconciliation results by outcome
    pub static ref STORE_RECONCILIATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_store_reconciliations_total",
        "Total number of JWT store reconciliation results",
        &["outcome"]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "resolver_uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    UPTIME_SECONDS.set(uptime_seconds());

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Start the uptime clock; later calls are no-ops
pub fn mark_started() {
    lazy_static::initialize(&STARTED_AT);
}

pub fn uptime_seconds() -> f64 {
    STARTED_AT.elapsed().as_secs_f64()
}

/// Record a JWT upload
pub fn record_upload(kind: &str, outcome: &str) {
    JWT_UPLOADS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Record a JWT fetch
pub fn record_fetch(kind: &str, outcome: &str) {
    JWT_FETCHES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Record a notification publish attempt
pub fn record_notification(success: bool) {
    NOTIFICATIONS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

/// Record one watcher reconciliation result
pub fn record_reconciliation(outcome: &str) {
    STORE_RECONCILIATIONS_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

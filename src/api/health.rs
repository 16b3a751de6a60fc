/// Health and metrics endpoints
use crate::{context::AppContext, metrics};
use axum::{extract::State, http::header, response::IntoResponse, response::Json, routing::get, Router};

/// Build health routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/healthz", get(health_basic))
        .route("/metrics", get(metrics_handler))
}

/// Basic health check
///
/// Returns simple JSON with status and version
pub async fn health_basic(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": metrics::uptime_seconds(),
        "read_only": ctx.resolver.store().is_read_only(),
    }))
}

/// Prometheus exposition
async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

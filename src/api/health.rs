/// Liveness, health and metrics endpoints
use crate::{context::AppContext, metrics};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_basic))
        .route("/metrics", get(metrics_text))
}

/// Plain liveness banner
pub async fn index() -> &'static str {
    "blobd active"
}

/// Basic health check
///
/// Returns simple JSON with status and version
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
pub async fn metrics_text() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

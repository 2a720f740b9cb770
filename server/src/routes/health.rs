//! Health check endpoint.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::engine::HealthReport;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub remote: HealthReport,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler. Answers 503 when the spreadsheet is unreachable or
/// a configured sheet is missing.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let remote = state.engine.health_check().await;
    let (code, status) = if remote.healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        remote,
    };
    (code, Json(body))
}

/// Root handler.
async fn root() -> &'static str {
    "Sheetsync Server"
}

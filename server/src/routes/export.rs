//! Backup export and range metadata.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use sheetsync_engine::SnapshotMetadata;

use crate::engine::Export;
use crate::error::Result;
use crate::AppState;

/// Create export routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/export", get(export_handler))
        .route("/ranges/{range}", get(range_handler))
}

/// GET /export - Every mirrored range as one JSON document.
async fn export_handler(State(state): State<AppState>) -> Result<Json<Export>> {
    Ok(Json(state.engine.export().await?))
}

/// GET /ranges/{range} - Metadata of the range's current snapshot.
async fn range_handler(
    State(state): State<AppState>,
    Path(range): Path<String>,
) -> Result<Json<SnapshotMetadata>> {
    Ok(Json(state.engine.snapshot(&range)?.metadata()))
}

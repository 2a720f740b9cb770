//! Sheetsync Server - spreadsheet-backed sync engine for a chat bot.
//!
//! The [`SyncEngine`] mirrors a set of sheets in memory and serves `get`,
//! `query`, `upsert` and `delete` on top of them. Reads come from the local
//! mirror, refreshed when it grows stale. Writes are serialized per sheet,
//! applied remotely with rate limiting and retries, and reconciled into the
//! mirror before the call returns.
//!
//! The binary adds a small HTTP surface (health, backup export) and
//! background jobs that keep mirrors warm and write periodic backups.

pub mod background;
pub mod cache;
pub mod client;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod routes;

pub use client::RateLimitedClient;
pub use config::{EngineConfig, QuotaConfig, RetryConfig, TableConfig};
pub use credentials::{AccessToken, AuthError, CredentialProvider, ServiceAccount, StaticToken};
pub use engine::{Export, HealthReport, SyncEngine};
pub use error::{Result, SyncError};
pub use remote::{MemorySheets, RemoteError, RemoteStore, SheetsClient};
pub use retry::RetryPolicy;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// Build the HTTP application.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

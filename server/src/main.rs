//! Sheetsync Server - mirrors spreadsheet ranges for a chat bot and keeps
//! them backed up.

use sheetsync_server::background::{spawn_backup_loop, spawn_pull_loop};
use sheetsync_server::config::{Config, CredentialSource};
use sheetsync_server::credentials::ServiceAccountKey;
use sheetsync_server::{
    app, AppState, CredentialProvider, ServiceAccount, SheetsClient, StaticToken, SyncEngine,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let engine_config = config.engine_config()?;

    tracing::info!("Starting Sheetsync on {}:{}", config.host, config.port);

    // Remote store
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let credentials: Arc<dyn CredentialProvider> = match &config.credentials {
        CredentialSource::ServiceAccountFile(path) => {
            let key = ServiceAccountKey::from_file(path)?;
            tracing::info!("Using service account {}", key.client_email);
            Arc::new(ServiceAccount::new(key, http.clone()))
        }
        CredentialSource::AccessToken(token) => Arc::new(StaticToken::new(token.clone())),
    };
    let store = Arc::new(SheetsClient::new(
        http,
        config.spreadsheet_id.clone(),
        credentials,
    ));

    // Sync engine
    let engine = Arc::new(SyncEngine::new(engine_config, store)?);
    tracing::info!("Checking sheet headers...");
    for (range, status) in engine.ensure_headers().await? {
        tracing::debug!("{}: {:?}", range, status);
    }
    engine.refresh_all().await?;

    // Background jobs
    let mut jobs = Vec::new();
    if let Some(period) = config.pull_interval {
        jobs.push(spawn_pull_loop(Arc::clone(&engine), period));
    }
    if let Some(dir) = config.backup_dir.clone() {
        tracing::info!(
            "Writing backups to {} every {:?}",
            dir.display(),
            config.backup_interval
        );
        let backups = spawn_backup_loop(Arc::clone(&engine), dir, config.backup_interval);
        jobs.push(backups);
    }

    // Build router
    let app = app(AppState { engine });

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    for job in jobs {
        job.abort();
    }

    Ok(())
}

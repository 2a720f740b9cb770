//! Periodic jobs: keeping mirrors warm and writing backups.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::engine::SyncEngine;

/// Errors writing a backup.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error(transparent)]
    Sync(#[from] crate::error::SyncError),

    #[error("failed to serialize backup: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write backup: {0}")]
    Io(#[from] std::io::Error),
}

/// Refresh every range every `period`.
pub fn spawn_pull_loop(engine: Arc<SyncEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already pulled.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for range in engine.ranges() {
                if let Err(e) = engine.refresh(range).await {
                    warn!(range = %range, "Background pull failed: {}", e);
                }
            }
        }
    })
}

/// File name of a backup taken at `at`.
pub fn backup_file_name(at: chrono::DateTime<Utc>) -> String {
    format!("backup_{}.json", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Export every range to a timestamped JSON file in `dir`.
pub async fn write_backup(engine: &SyncEngine, dir: &Path) -> Result<PathBuf, BackupError> {
    let export = engine.export().await?;
    let json = serde_json::to_vec_pretty(&export)?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(backup_file_name(export.exported_at));
    tokio::fs::write(&path, json).await?;

    info!(path = %path.display(), sheets = export.sheets.len(), "Backup written");
    Ok(path)
}

/// Write a backup into `dir` every `period`, starting one period from now.
pub fn spawn_backup_loop(
    engine: Arc<SyncEngine>,
    dir: PathBuf,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = write_backup(&engine, &dir).await {
                error!(dir = %dir.display(), "Backup failed: {}", e);
            }
        }
    })
}

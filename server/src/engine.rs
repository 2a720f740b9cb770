//! The sync engine: reads through the mirror, writes through the queues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sheetsync_engine::{
    CacheSnapshot, Matches, MutationKind, Predicate, RangeName, Record, Row, RowHandle, Schema,
    SnapshotMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{now_ms, HeaderStatus, MirrorCache};
use crate::client::RateLimitedClient;
use crate::config::{ConfigError, EngineConfig, TableConfig};
use crate::error::{Result, SyncError};
use crate::queue::WriteQueue;
use crate::remote::RemoteStore;

struct RangeState {
    table: TableConfig,
    cache: Arc<MirrorCache>,
    queue: WriteQueue,
}

/// Mirrors the configured sheets and serializes writes to them.
///
/// Reads are served from the range's snapshot, refreshed first when it is
/// older than the staleness bound. Writes go through the range's write
/// queue and return once the remote store has confirmed them and the mirror
/// reflects them, so a caller always reads its own writes.
pub struct SyncEngine {
    ranges: HashMap<RangeName, RangeState>,
    /// Range names in configuration order
    order: Vec<RangeName>,
    client: Arc<RateLimitedClient>,
    max_staleness_ms: u64,
    instance_id: Uuid,
}

/// Result of [`SyncEngine::health_check`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    /// Sheets present in the spreadsheet
    pub sheets: Vec<String>,
    /// Configured ranges with no sheet of that name
    pub missing: Vec<RangeName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A backup of every mirrored range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub instance_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub sheets: Vec<SheetExport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetExport {
    pub metadata: SnapshotMetadata,
    pub header: Vec<String>,
    pub rows: Vec<Record>,
}

impl SyncEngine {
    /// Build an engine over `store`. Spawns one write worker per table, so it
    /// must be called inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RemoteStore>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let client = Arc::new(RateLimitedClient::from_config(store, &config));
        let clock = Arc::new(sheetsync_engine::LogicalClock::new());

        let mut ranges = HashMap::new();
        let mut order = Vec::new();
        for table in config.tables.iter().cloned() {
            let cache = Arc::new(MirrorCache::new(
                table.name.clone(),
                table.schema.clone(),
                Arc::clone(&client),
                Arc::clone(&clock),
            ));
            let (queue, _worker) = WriteQueue::spawn(Arc::clone(&cache), Arc::clone(&clock));
            order.push(table.name.clone());
            ranges.insert(
                table.name.clone(),
                RangeState {
                    table,
                    cache,
                    queue,
                },
            );
        }

        let instance_id = Uuid::new_v4();
        info!(%instance_id, ranges = order.len(), "Sync engine ready");

        Ok(Self {
            ranges,
            order,
            client,
            max_staleness_ms: config.max_staleness_ms,
            instance_id,
        })
    }

    fn state(&self, range: &str) -> Result<&RangeState> {
        self.ranges
            .get(range)
            .ok_or_else(|| SyncError::UnknownRange(range.to_string()))
    }

    /// The range's snapshot, refreshed first if it is stale. Waits for an
    /// in-flight refresh rather than serving the snapshot it replaces.
    async fn fresh(&self, state: &RangeState) -> Result<Arc<CacheSnapshot>> {
        let snapshot = state.cache.settled().await;
        if snapshot.is_stale(now_ms(), self.max_staleness_ms) {
            debug!(range = %state.table.name, "Snapshot stale, refreshing");
            state.cache.refresh().await
        } else {
            Ok(snapshot)
        }
    }

    /// The record behind `handle`.
    pub async fn get(&self, handle: &RowHandle) -> Result<Record> {
        self.get_row(handle).await.map(|row| row.record)
    }

    /// The row behind `handle`, with its current handle.
    pub async fn get_row(&self, handle: &RowHandle) -> Result<Row> {
        let state = self.state(handle.range())?;
        let snapshot = self.fresh(state).await?;
        snapshot
            .find(handle)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("row {handle}")))
    }

    /// Records of `range` matching `predicate`, from one snapshot.
    pub async fn query<P: Predicate>(
        &self,
        range: &str,
        predicate: P,
    ) -> Result<impl Iterator<Item = Record>> {
        let rows = self.query_rows(range, predicate).await?;
        Ok(rows.map(|row| row.record))
    }

    /// Rows of `range` matching `predicate`, with their handles.
    pub async fn query_rows<P: Predicate>(&self, range: &str, predicate: P) -> Result<Matches<P>> {
        let state = self.state(range)?;
        let snapshot = self.fresh(state).await?;
        Ok(Matches::new(snapshot, predicate))
    }

    /// Insert `record` (no handle) or update the row behind `handle` with the
    /// columns `record` carries.
    ///
    /// Returns once the write is confirmed and mirrored.
    pub async fn upsert(
        &self,
        range: &str,
        handle: Option<&RowHandle>,
        record: Record,
    ) -> Result<RowHandle> {
        let state = self.state(range)?;
        let schema = &state.table.schema;

        let kind = match handle {
            Some(handle) if handle.range() != range => {
                return Err(SyncError::NotFound(format!(
                    "row {handle} is not in '{range}'"
                )));
            }
            Some(handle) => MutationKind::Update {
                handle: handle.clone(),
                patch: schema
                    .validate_partial(&record)
                    .map_err(|e| SyncError::engine(range, e))?,
            },
            None => MutationKind::Insert {
                record: schema
                    .validate_full(&record)
                    .map_err(|e| SyncError::engine(range, e))?,
            },
        };

        state
            .queue
            .enqueue(kind)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("written row in '{range}'")))
    }

    /// Delete the row behind `handle`.
    pub async fn delete(&self, handle: &RowHandle) -> Result<()> {
        let state = self.state(handle.range())?;
        state
            .queue
            .enqueue(MutationKind::Delete {
                handle: handle.clone(),
            })
            .await?;
        Ok(())
    }

    /// Pull `range` now.
    pub async fn refresh(&self, range: &str) -> Result<Arc<CacheSnapshot>> {
        self.state(range)?.cache.refresh().await
    }

    /// Pull every range, one after the other.
    pub async fn refresh_all(&self) -> Result<()> {
        for range in &self.order {
            self.refresh(range).await?;
        }
        Ok(())
    }

    /// The latest snapshot of `range`, however old.
    pub fn snapshot(&self, range: &str) -> Result<Arc<CacheSnapshot>> {
        Ok(self.state(range)?.cache.current())
    }

    /// Create missing sheets and check every header row.
    pub async fn ensure_headers(&self) -> Result<Vec<(RangeName, HeaderStatus)>> {
        let mut statuses = Vec::with_capacity(self.order.len());
        for range in &self.order {
            let state = self.state(range)?;
            let status = state.cache.ensure_header(state.table.repair_headers).await?;
            statuses.push((range.clone(), status));
        }
        Ok(statuses)
    }

    /// Check the spreadsheet is reachable and holds every configured sheet.
    pub async fn health_check(&self) -> HealthReport {
        match self.client.health().await {
            Ok(sheets) => {
                let missing: Vec<RangeName> = self
                    .order
                    .iter()
                    .filter(|range| !sheets.contains(range))
                    .cloned()
                    .collect();
                HealthReport {
                    healthy: missing.is_empty(),
                    sheets,
                    missing,
                    error: None,
                }
            }
            Err(e) => HealthReport {
                healthy: false,
                sheets: Vec::new(),
                missing: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// A backup of every range, each refreshed first if stale.
    pub async fn export(&self) -> Result<Export> {
        let states = self
            .order
            .iter()
            .map(|range| self.state(range))
            .collect::<Result<Vec<_>>>()?;
        let pulls = states.into_iter().map(|state| self.fresh(state));
        let snapshots = futures::future::try_join_all(pulls).await?;

        let sheets = snapshots
            .iter()
            .map(|snapshot| SheetExport {
                metadata: snapshot.metadata(),
                header: self
                    .ranges
                    .get(&snapshot.range)
                    .map(|state| state.table.schema.header())
                    .unwrap_or_default(),
                rows: snapshot.iter().map(|row| row.record.clone()).collect(),
            })
            .collect();

        Ok(Export {
            instance_id: self.instance_id,
            exported_at: Utc::now(),
            sheets,
        })
    }

    /// Configured range names, in configuration order.
    pub fn ranges(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn schema(&self, range: &str) -> Result<&Schema> {
        Ok(&self.state(range)?.table.schema)
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }
}

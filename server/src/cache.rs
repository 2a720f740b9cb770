//! Local mirror of one sheet.
//!
//! A [`MirrorCache`] holds the latest [`CacheSnapshot`] of a range behind an
//! `Arc`, so readers never block on remote IO and never see a half-built
//! snapshot. Remote work for the range (pulls and the write queue's applies)
//! is serialized by one IO lock.

use parking_lot::RwLock;
use sheetsync_engine::{
    codec, reconcile::reconcile_pull, CacheSnapshot, LogicalClock, RangeName, Schema, Timestamp,
    HEADER_ROW,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::client::RateLimitedClient;
use crate::error::{Result, SyncError};

/// What [`MirrorCache::ensure_header`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// The sheet was missing; it was created with the schema header
    Created,
    /// The sheet was empty; the schema header was written
    Written,
    /// The header did not match the schema and was rewritten
    Repaired,
    /// The header already matched
    Ok,
}

/// Proof that the caller holds the range's IO lock.
pub type IoGuard<'a> = MutexGuard<'a, ()>;

pub struct MirrorCache {
    range: RangeName,
    schema: Schema,
    client: Arc<RateLimitedClient>,
    ids: Arc<LogicalClock>,
    current: RwLock<Arc<CacheSnapshot>>,
    io: Mutex<()>,
    refreshing: watch::Sender<bool>,
}

/// Lowers the refresh flag when the pull finishes or is cancelled.
struct RefreshFlag<'a>(&'a watch::Sender<bool>);

impl<'a> RefreshFlag<'a> {
    fn raise(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for RefreshFlag<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

impl MirrorCache {
    pub fn new(
        range: impl Into<RangeName>,
        schema: Schema,
        client: Arc<RateLimitedClient>,
        ids: Arc<LogicalClock>,
    ) -> Self {
        let range = range.into();
        let (refreshing, _) = watch::channel(false);
        Self {
            current: RwLock::new(Arc::new(CacheSnapshot::empty(range.clone()))),
            range,
            schema,
            client,
            ids,
            io: Mutex::new(()),
            refreshing,
        }
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    pub(crate) fn ids(&self) -> &LogicalClock {
        &self.ids
    }

    /// The latest snapshot, without waiting.
    pub fn current(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// The latest snapshot once any in-flight pull has finished.
    pub async fn settled(&self) -> Arc<CacheSnapshot> {
        let mut rx = self.refreshing.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|busy| !*busy).await;
        self.current()
    }

    /// Pull the range and replace the snapshot.
    ///
    /// Callers that arrive while another pull is queued or running share its
    /// result instead of issuing their own read.
    pub async fn refresh(&self) -> Result<Arc<CacheSnapshot>> {
        let seen = self.current().pulls;
        let guard = self.io.lock().await;

        let latest = self.current();
        if latest.pulls != seen {
            debug!(range = %self.range, pulls = latest.pulls, "Refresh coalesced");
            return Ok(latest);
        }
        self.pull_locked(&guard).await
    }

    /// Take the range's IO lock.
    pub(crate) async fn lock(&self) -> IoGuard<'_> {
        self.io.lock().await
    }

    /// Pull while already holding the IO lock.
    ///
    /// On failure the previous snapshot stays in place.
    pub(crate) async fn pull_locked(&self, _io: &IoGuard<'_>) -> Result<Arc<CacheSnapshot>> {
        let _flag = RefreshFlag::raise(&self.refreshing);

        let values = self.client.read(&self.range).await?;
        let pulled = codec::decode_sheet(&values, &self.schema)
            .map_err(|e| SyncError::engine(&self.range, e))?;

        let previous = self.current();
        let (snapshot, result) =
            reconcile_pull(&previous, pulled, &self.schema, &self.ids, now_ms());

        info!(
            range = %self.range,
            revision = snapshot.revision,
            rows = snapshot.len(),
            added = result.added,
            changed = result.changed,
            removed = result.removed,
            "Pulled range"
        );
        Ok(self.replace(snapshot))
    }

    /// Replace the snapshot with `f(current)`.
    pub fn patch<T>(
        &self,
        f: impl FnOnce(&CacheSnapshot) -> sheetsync_engine::error::Result<(CacheSnapshot, T)>,
    ) -> sheetsync_engine::error::Result<T> {
        let mut current = self.current.write();
        let (next, out) = f(&current)?;
        *current = Arc::new(next);
        Ok(out)
    }

    /// Mark the snapshot stale so the next read pulls the range again.
    pub fn invalidate(&self) {
        let mut current = self.current.write();
        if current.fetched_at != 0 {
            *current = Arc::new(CacheSnapshot {
                fetched_at: 0,
                ..CacheSnapshot::clone(&current)
            });
        }
    }

    fn replace(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Arc::clone(&snapshot);
        snapshot
    }

    /// Make sure the sheet exists and starts with the schema header.
    ///
    /// A mismatching header is rewritten when `repair` is set, padded with
    /// empty cells so stale header cells to the right are cleared. Otherwise
    /// it fails with [`SyncError::MalformedRow`].
    pub async fn ensure_header(&self, repair: bool) -> Result<HeaderStatus> {
        let _io = self.io.lock().await;

        let created = self.client.ensure_sheet(&self.range).await?;
        let existing = self
            .client
            .read_rows(&self.range, HEADER_ROW, HEADER_ROW)
            .await?;
        let expected = self.schema.header();

        let Some(actual) = existing.into_iter().next().filter(|row| !row.is_empty()) else {
            self.client
                .write(&self.range, HEADER_ROW, vec![expected])
                .await?;
            let status = if created {
                HeaderStatus::Created
            } else {
                HeaderStatus::Written
            };
            info!(range = %self.range, ?status, "Wrote header row");
            return Ok(status);
        };

        match self.schema.check_header(&actual) {
            Ok(()) => Ok(HeaderStatus::Ok),
            Err(e) if repair => {
                warn!(range = %self.range, "Header mismatch, rewriting: {}", e);
                let width = expected.len().max(actual.len());
                let header = codec::pad_row(expected, width);
                self.client
                    .write(&self.range, HEADER_ROW, vec![header])
                    .await?;
                Ok(HeaderStatus::Repaired)
            }
            Err(e) => Err(SyncError::engine(&self.range, e)),
        }
    }
}

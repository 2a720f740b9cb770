//! Per-range write queue.
//!
//! Mutations are stamped with a logical timestamp and handed to a single
//! worker task per range, which applies them one at a time in timestamp
//! order and reconciles the mirror after each confirmed write. The worker
//! owns the mutation once it is queued: a caller that stops waiting does not
//! stop the write.

use sheetsync_engine::{
    codec,
    reconcile::{apply_confirmed, check_version, compare_remote},
    Applied, ConflictReason, LogicalClock, MutationKind, PendingMutation, RangeName, RemoteMatch,
    Row, RowHandle,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{IoGuard, MirrorCache};
use crate::error::{Result, SyncError};

struct Job {
    mutation: PendingMutation,
    reply: oneshot::Sender<Result<Option<RowHandle>>>,
}

/// The write queue of one range.
pub struct WriteQueue {
    range: RangeName,
    clock: Arc<LogicalClock>,
    sender: mpsc::UnboundedSender<Job>,
    /// Held while stamping and sending, so queue order is timestamp order
    order: parking_lot::Mutex<()>,
}

impl WriteQueue {
    /// Start the worker for `cache`'s range. Must be called inside a tokio
    /// runtime. The worker stops once the queue is dropped and drained.
    pub fn spawn(cache: Arc<MirrorCache>, clock: Arc<LogicalClock>) -> (Self, JoinHandle<()>) {
        let (sender, jobs) = mpsc::unbounded_channel();
        let range = cache.range().to_string();
        let worker = tokio::spawn(run(cache, jobs));
        let queue = Self {
            range,
            clock,
            sender,
            order: parking_lot::Mutex::new(()),
        };
        (queue, worker)
    }

    /// Queue a mutation and wait for it to be applied.
    ///
    /// The timestamp is assigned when this is called, not when the returned
    /// future is first polled. Resolves to the handle of the written row for
    /// inserts and updates.
    pub fn enqueue(
        &self,
        kind: MutationKind,
    ) -> impl Future<Output = Result<Option<RowHandle>>> + Send + 'static {
        let (reply, applied) = oneshot::channel();
        let sent = {
            let _order = self.order.lock();
            let mutation = PendingMutation::new(self.range.clone(), self.clock.tick(), kind);
            debug!(
                range = %mutation.range,
                timestamp = %mutation.timestamp,
                kind = mutation.kind_name(),
                "Queued mutation"
            );
            self.sender.send(Job { mutation, reply }).is_ok()
        };

        async move {
            if !sent {
                return Err(SyncError::Shutdown);
            }
            applied.await.unwrap_or_else(|_| Err(SyncError::Shutdown))
        }
    }
}

async fn run(cache: Arc<MirrorCache>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let mut mutation = job.mutation;
        let result = apply(&cache, &mut mutation).await;
        match &result {
            Ok(_) => info!(
                range = %mutation.range,
                timestamp = %mutation.timestamp,
                kind = mutation.kind_name(),
                attempts = mutation.attempts,
                "Applied mutation"
            ),
            Err(e) => warn!(
                range = %mutation.range,
                timestamp = %mutation.timestamp,
                kind = mutation.kind_name(),
                "Mutation failed: {}", e
            ),
        }
        // The caller may have stopped waiting.
        let _ = job.reply.send(result);
    }
    debug!(range = %cache.range(), "Write queue closed");
}

async fn apply(cache: &MirrorCache, mutation: &mut PendingMutation) -> Result<Option<RowHandle>> {
    let io = cache.lock().await;
    let range = cache.range();
    let schema = cache.schema();
    let client = cache.client();
    let engine_error = |e: sheetsync_engine::Error| SyncError::engine(range, e);

    // An invalidated mirror may be missing a write whose reply was lost.
    let mut snapshot = cache.current();
    if !snapshot.is_loaded() || snapshot.fetched_at == 0 {
        snapshot = cache.pull_locked(&io).await?;
    }

    let (applied, attempts) = match &mutation.kind {
        MutationKind::Insert { record } => {
            let record = schema.validate_full(record).map_err(engine_error)?;
            if let Some(key) = schema.key_of(&record) {
                if snapshot.find_by_key(&key).is_some() {
                    return Err(SyncError::Conflict {
                        handle: None,
                        reason: ConflictReason::DuplicateKey { key },
                    });
                }
            }
            let cells = codec::encode(&record, schema).map_err(engine_error)?;
            let confirmed = match client.append(range, cells).await {
                Ok(confirmed) => confirmed,
                Err(e) => return Err(resync(cache, &io, e).await),
            };
            let applied = Applied::Inserted {
                record,
                position: confirmed.value,
            };
            (applied, confirmed.attempts)
        }
        MutationKind::Update { handle, patch } => {
            let row = resolve(cache, &io, handle).await?;
            let record = schema
                .validate_full(&row.record.merged(patch))
                .map_err(engine_error)?;
            if let Some(key) = schema.key_of(&record) {
                let taken = cache
                    .current()
                    .find_by_key(&key)
                    .is_some_and(|other| other.handle.row_id() != row.handle.row_id());
                if taken {
                    return Err(SyncError::conflict(handle, ConflictReason::DuplicateKey { key }));
                }
            }
            let position = row.handle.position();
            let cells = codec::encode(&record, schema).map_err(engine_error)?;
            let confirmed = match client.write(range, position, vec![cells]).await {
                Ok(confirmed) => confirmed,
                Err(e) => return Err(resync(cache, &io, e).await),
            };
            let applied = Applied::Updated {
                handle: row.handle,
                record,
                position,
            };
            (applied, confirmed.attempts)
        }
        MutationKind::Delete { handle } => {
            let row = resolve(cache, &io, handle).await?;
            let position = row.handle.position();
            let confirmed = match client.delete_row(range, position).await {
                Ok(confirmed) => confirmed,
                Err(e) => return Err(resync(cache, &io, e).await),
            };
            let applied = Applied::Deleted {
                handle: row.handle,
                position,
            };
            (applied, confirmed.attempts)
        }
    };
    mutation.record_attempts(attempts);

    reconcile(cache, &io, &applied).await
}

/// Find the row `handle` refers to and check it is still what the caller saw.
///
/// The row is read back at its last known position. If something else is
/// there and the sheet has a key column, the range is pulled again and the
/// row located by key.
async fn resolve(cache: &MirrorCache, io: &IoGuard<'_>, handle: &RowHandle) -> Result<Row> {
    let range = cache.range();
    let schema = cache.schema();

    let cached = cache
        .current()
        .find(handle)
        .cloned()
        .ok_or_else(|| SyncError::conflict(handle, ConflictReason::RowDeleted))?;
    check_version(handle, &cached).map_err(|reason| SyncError::conflict(handle, reason))?;

    let position = cached.handle.position();
    let remote = cache
        .client()
        .read_rows(range, position, position)
        .await?
        .into_iter()
        .next()
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .and_then(|cells| codec::decode(&codec::pad_row(cells, schema.len()), schema).ok());

    match compare_remote(&cached, remote.as_ref(), schema) {
        RemoteMatch::Same => Ok(cached),
        RemoteMatch::Modified => Err(SyncError::conflict(handle, ConflictReason::RowModified)),
        RemoteMatch::Missing if cached.handle.logical_key().is_none() => {
            Err(SyncError::conflict(handle, ConflictReason::RowDeleted))
        }
        RemoteMatch::Missing => {
            debug!(range = %range, row = %cached.handle, "Row moved, re-reading range");
            let fresh = cache.pull_locked(io).await?;
            match fresh.find_by_row_id(cached.handle.row_id()) {
                Some(row) if row.handle.version() == cached.handle.version() => Ok(row.clone()),
                Some(_) => Err(SyncError::conflict(handle, ConflictReason::RowModified)),
                None => Err(SyncError::conflict(handle, ConflictReason::RowDeleted)),
            }
        }
    }
}

/// Bring the mirror in line with the remote after a write failed.
///
/// The write may have landed even though no reply arrived. If the range
/// cannot be read either, the snapshot is invalidated so the next read or
/// write pulls it first.
async fn resync(cache: &MirrorCache, io: &IoGuard<'_>, error: SyncError) -> SyncError {
    warn!(range = %cache.range(), "Write failed ({}), re-reading range", error);
    if let Err(e) = cache.pull_locked(io).await {
        warn!(range = %cache.range(), "Re-read failed, invalidating mirror: {}", e);
        cache.invalidate();
    }
    error
}

/// Patch the mirror with a confirmed write, or pull the range if the patch
/// cannot be applied.
async fn reconcile(
    cache: &MirrorCache,
    io: &IoGuard<'_>,
    applied: &Applied,
) -> Result<Option<RowHandle>> {
    let patched = cache.patch(|snapshot| {
        apply_confirmed(snapshot, applied, cache.schema(), cache.ids())
    });
    let error = match patched {
        Ok(handle) => return Ok(handle),
        Err(e) => e,
    };

    warn!(range = %cache.range(), "Cannot patch mirror ({}), re-reading range", error);
    let snapshot = match cache.pull_locked(io).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            cache.invalidate();
            return Err(e);
        }
    };
    Ok(match applied {
        Applied::Inserted { position, .. } => {
            snapshot.at_position(*position).map(|r| r.handle.clone())
        }
        Applied::Updated { handle, .. } => snapshot.find(handle).map(|r| r.handle.clone()),
        Applied::Deleted { .. } => None,
    })
}

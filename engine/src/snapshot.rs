//! Cache snapshots: immutable point-in-time copies of a range.
//!
//! A snapshot is never edited. Refreshes and reconciliation patches build a
//! new snapshot from the previous one (see [`crate::reconcile`]), so a reader
//! holding an `Arc<CacheSnapshot>` always sees one consistent state.

use crate::{Position, RangeName, Record, RowHandle, RowId, RowKey, Timestamp, HEADER_ROW};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One mirrored row: the handle that addresses it and its decoded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub handle: RowHandle,
    pub record: Record,
}

/// A point-in-time copy of one range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Range this snapshot mirrors
    pub range: RangeName,
    /// Bumped by every pull and every reconciliation patch
    pub revision: u64,
    /// Number of full remote reads behind this snapshot
    pub pulls: u64,
    /// When the last full read completed (ms since epoch)
    pub fetched_at: Timestamp,
    /// Rows ordered by sheet position
    pub rows: Vec<Row>,
}

impl CacheSnapshot {
    /// An empty snapshot that has never been pulled. Always stale.
    pub fn empty(range: impl Into<RangeName>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            range: range.into(),
            revision: 0,
            pulls: 0,
            fetched_at: 0,
            rows: Vec::new(),
        }
    }

    /// True if the snapshot was never pulled or is older than `max_age_ms`.
    pub fn is_stale(&self, now: Timestamp, max_age_ms: u64) -> bool {
        self.pulls == 0 || now.saturating_sub(self.fetched_at) > max_age_ms
    }

    /// True if the snapshot has been filled by at least one pull.
    pub fn is_loaded(&self) -> bool {
        self.pulls > 0
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Find the row a handle refers to.
    ///
    /// Looks up the engine row id first, then falls back to the logical key
    /// so handles survive a refresh that had to re-identify the row.
    pub fn find(&self, handle: &RowHandle) -> Option<&Row> {
        self.find_by_row_id(handle.row_id()).or_else(|| match handle.key() {
            RowKey::Logical(key) => self.find_by_key(key),
            RowKey::Position(_) => None,
        })
    }

    pub fn find_by_row_id(&self, row_id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.handle.row_id() == row_id)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&Row> {
        self.rows
            .iter()
            .find(|r| r.handle.logical_key() == Some(key))
    }

    pub fn at_position(&self, position: Position) -> Option<&Row> {
        self.rows.iter().find(|r| r.handle.position() == position)
    }

    /// Position the next appended row is expected to land on.
    pub fn next_position(&self) -> Position {
        self.rows
            .last()
            .map_or(HEADER_ROW + 1, |r| r.handle.position() + 1)
    }

    /// Summary of the snapshot without the rows.
    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata::from(self)
    }
}

/// Metadata about a snapshot (without the rows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub range: RangeName,
    pub revision: u64,
    pub pulls: u64,
    pub fetched_at: Timestamp,
    pub row_count: usize,
}

impl From<&CacheSnapshot> for SnapshotMetadata {
    fn from(snapshot: &CacheSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            range: snapshot.range.clone(),
            revision: snapshot.revision,
            pulls: snapshot.pulls,
            fetched_at: snapshot.fetched_at,
            row_count: snapshot.rows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_id: RowId, key: &str, position: Position) -> Row {
        Row {
            handle: RowHandle::new(
                "Subscribers",
                row_id,
                RowKey::Logical(key.into()),
                position,
                row_id,
            ),
            record: Record::new().with("id", key),
        }
    }

    fn test_snapshot() -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::empty("Subscribers");
        snapshot.pulls = 1;
        snapshot.revision = 1;
        snapshot.fetched_at = 1_000;
        snapshot.rows = vec![row(1, "a", 2), row(2, "b", 3)];
        snapshot
    }

    #[test]
    fn empty_snapshot_is_stale() {
        let snapshot = CacheSnapshot::empty("Subscribers");
        assert!(!snapshot.is_loaded());
        assert!(snapshot.is_stale(0, u64::MAX));
        assert_eq!(snapshot.next_position(), 2);
    }

    #[test]
    fn staleness_by_age() {
        let snapshot = test_snapshot();
        assert!(!snapshot.is_stale(1_500, 500));
        assert!(snapshot.is_stale(1_501, 500));
        // clock going backwards never makes a snapshot stale
        assert!(!snapshot.is_stale(10, 500));
    }

    #[test]
    fn find_by_row_id_then_key() {
        let snapshot = test_snapshot();

        let exact = RowHandle::new("Subscribers", 2, RowKey::Logical("b".into()), 3, 2);
        assert_eq!(snapshot.find(&exact).unwrap().handle.position(), 3);

        // unknown row id, known key
        let reidentified = RowHandle::new("Subscribers", 99, RowKey::Logical("a".into()), 7, 1);
        assert_eq!(snapshot.find(&reidentified).unwrap().handle.row_id(), 1);

        let positional = RowHandle::new("Subscribers", 99, RowKey::Position(2), 2, 1);
        assert!(snapshot.find(&positional).is_none());
    }

    #[test]
    fn next_position_follows_last_row() {
        assert_eq!(test_snapshot().next_position(), 4);
        assert_eq!(test_snapshot().at_position(3).unwrap().handle.row_id(), 2);
    }

    #[test]
    fn snapshot_metadata() {
        let metadata = test_snapshot().metadata();
        assert_eq!(metadata.range, "Subscribers");
        assert_eq!(metadata.revision, 1);
        assert_eq!(metadata.pulls, 1);
        assert_eq!(metadata.row_count, 2);
    }
}

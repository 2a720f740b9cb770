//! Reconciliation of cache snapshots with the remote sheet.
//!
//! Two paths produce a new snapshot:
//!
//! 1. A full pull: [`reconcile_pull`] matches freshly read rows against the
//!    previous snapshot (by logical key, else by position) so that unchanged
//!    rows keep their row id and version token.
//! 2. A confirmed write: [`apply_confirmed`] patches only the affected row,
//!    shifting positions after a delete, without another remote read.
//!
//! Before a write is sent, [`compare_remote`] and [`check_version`] decide
//! whether the row a handle refers to is still the row the caller saw.

use crate::{
    error::Result, CacheSnapshot, Error, LogicalClock, Position, Record, Row, RowHandle, RowKey,
    Schema, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A decoded row from a full read, with its sheet position.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledRow {
    pub position: Position,
    pub record: Record,
}

/// Summary of what a pull changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Rows not present in the previous snapshot
    pub added: usize,
    /// Rows whose content changed since the previous snapshot
    pub changed: usize,
    /// Rows carried over unchanged (possibly at a new position)
    pub unchanged: usize,
    /// Rows of the previous snapshot that are gone
    pub removed: usize,
}

/// A write the remote store has confirmed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// A complete record appended at `position`
    Inserted { record: Record, position: Position },
    /// The row behind `handle` now holds `record` (complete) at `position`
    Updated {
        handle: RowHandle,
        record: Record,
        position: Position,
    },
    /// The row behind `handle` was removed from `position`
    Deleted {
        handle: RowHandle,
        position: Position,
    },
}

/// Why a mutation through a handle was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictReason {
    /// The handle carries an older version than the mirror
    StaleVersion { held: Version, current: Version },
    /// The row no longer exists remotely
    RowDeleted,
    /// The row was edited remotely since it was mirrored
    RowModified,
    /// Another row already carries this logical key
    DuplicateKey { key: String },
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::StaleVersion { held, current } => {
                write!(f, "handle version {held} is behind current version {current}")
            }
            ConflictReason::RowDeleted => write!(f, "row was deleted remotely"),
            ConflictReason::RowModified => write!(f, "row was modified remotely"),
            ConflictReason::DuplicateKey { key } => write!(f, "key '{key}' is already in use"),
        }
    }
}

/// How the remote content at a row's last known position compares to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMatch {
    /// The same row with the same content
    Same,
    /// The same row (same key, or same position for keyless sheets), edited
    Modified,
    /// Nothing there, or a different row
    Missing,
}

fn key_for(schema: &Schema, record: &Record, position: Position) -> RowKey {
    schema
        .key_of(record)
        .map_or(RowKey::Position(position), RowKey::Logical)
}

/// Build the snapshot for a full read, carrying identities over from `previous`.
pub fn reconcile_pull(
    previous: &CacheSnapshot,
    pulled: Vec<PulledRow>,
    schema: &Schema,
    ids: &LogicalClock,
    fetched_at: Timestamp,
) -> (CacheSnapshot, ReconcileResult) {
    let mut result = ReconcileResult::default();
    let mut used = HashSet::new();
    let mut rows = Vec::with_capacity(pulled.len());

    for PulledRow { position, record } in pulled {
        let key = key_for(schema, &record, position);
        let earlier = match &key {
            RowKey::Logical(k) => previous.find_by_key(k),
            RowKey::Position(p) => previous.at_position(*p),
        }
        .filter(|row| !used.contains(&row.handle.row_id()));

        let handle = match earlier {
            Some(row) if row.record == record => {
                used.insert(row.handle.row_id());
                result.unchanged += 1;
                row.handle.moved_to(position)
            }
            Some(row) => {
                used.insert(row.handle.row_id());
                result.changed += 1;
                row.handle
                    .moved_to(position)
                    .with_version(ids.tick().0, key)
            }
            None => {
                result.added += 1;
                let row_id = ids.tick().0;
                RowHandle::new(previous.range.clone(), row_id, key, position, ids.tick().0)
            }
        };
        rows.push(Row { handle, record });
    }
    result.removed = previous.len().saturating_sub(used.len());

    let snapshot = CacheSnapshot {
        format_version: previous.format_version,
        range: previous.range.clone(),
        revision: previous.revision + 1,
        pulls: previous.pulls + 1,
        fetched_at,
        rows,
    };
    (snapshot, result)
}

/// Patch a snapshot with a confirmed write.
///
/// Returns the new snapshot and, for inserts and updates, the handle of the
/// written row. Fails when the patch cannot be applied without a full read:
/// the snapshot was never pulled, an append landed somewhere other than right
/// after the cached rows, or the row is no longer mirrored.
pub fn apply_confirmed(
    snapshot: &CacheSnapshot,
    applied: &Applied,
    schema: &Schema,
    ids: &LogicalClock,
) -> Result<(CacheSnapshot, Option<RowHandle>)> {
    if !snapshot.is_loaded() {
        return Err(Error::InvalidSnapshot(format!(
            "snapshot of '{}' was never pulled",
            snapshot.range
        )));
    }

    let mut rows = snapshot.rows.clone();
    let handle = match applied {
        Applied::Inserted { record, position } => {
            let expected = snapshot.next_position();
            if *position != expected {
                return Err(Error::PositionDrift {
                    expected,
                    actual: *position,
                });
            }
            let key = key_for(schema, record, *position);
            let row_id = ids.tick().0;
            let handle =
                RowHandle::new(snapshot.range.clone(), row_id, key, *position, ids.tick().0);
            rows.push(Row {
                handle: handle.clone(),
                record: record.clone(),
            });
            Some(handle)
        }
        Applied::Updated {
            handle,
            record,
            position,
        } => {
            let row = rows
                .iter_mut()
                .find(|r| r.handle.row_id() == handle.row_id())
                .ok_or(Error::RowNotFound(handle.row_id()))?;
            let key = key_for(schema, record, *position);
            row.handle = row
                .handle
                .moved_to(*position)
                .with_version(ids.tick().0, key);
            row.record = record.clone();
            Some(row.handle.clone())
        }
        Applied::Deleted { handle, position } => {
            let index = rows
                .iter()
                .position(|r| r.handle.row_id() == handle.row_id())
                .ok_or(Error::RowNotFound(handle.row_id()))?;
            rows.remove(index);
            for row in rows.iter_mut().filter(|r| r.handle.position() > *position) {
                row.handle = row.handle.moved_to(row.handle.position() - 1);
            }
            None
        }
    };

    let patched = CacheSnapshot {
        revision: snapshot.revision + 1,
        rows,
        ..snapshot.clone()
    };
    Ok((patched, handle))
}

/// Compare the mirrored row with what the sheet holds at its position.
pub fn compare_remote(cached: &Row, remote: Option<&Record>, schema: &Schema) -> RemoteMatch {
    let Some(remote) = remote else {
        return RemoteMatch::Missing;
    };
    if let Some(key) = cached.handle.logical_key() {
        if schema.key_of(remote).as_deref() != Some(key) {
            return RemoteMatch::Missing;
        }
    }
    if *remote == cached.record {
        RemoteMatch::Same
    } else {
        RemoteMatch::Modified
    }
}

/// Check that a caller's handle carries the mirror's current version.
pub fn check_version(handle: &RowHandle, cached: &Row) -> std::result::Result<(), ConflictReason> {
    if handle.version() == cached.handle.version() {
        Ok(())
    } else {
        Err(ConflictReason::StaleVersion {
            held: handle.version(),
            current: cached.handle.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, ColumnType};

    fn keyed_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::required("name", ColumnType::Text),
        ])
        .unwrap()
        .with_key("id")
        .unwrap()
    }

    fn keyless_schema() -> Schema {
        Schema::new(vec![ColumnDef::required("link", ColumnType::Text)]).unwrap()
    }

    fn person(id: i64, name: &str) -> Record {
        Record::new().with("id", id).with("name", name)
    }

    fn pulled(records: Vec<Record>) -> Vec<PulledRow> {
        records
            .into_iter()
            .enumerate()
            .map(|(i, record)| PulledRow {
                position: i as Position + 2,
                record,
            })
            .collect()
    }

    fn loaded(schema: &Schema, ids: &LogicalClock, records: Vec<Record>) -> CacheSnapshot {
        let empty = CacheSnapshot::empty("People");
        reconcile_pull(&empty, pulled(records), schema, ids, 1_000).0
    }

    #[test]
    fn first_pull_adds_everything() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let empty = CacheSnapshot::empty("People");

        let (snapshot, result) = reconcile_pull(
            &empty,
            pulled(vec![person(1, "A"), person(2, "B")]),
            &schema,
            &ids,
            1_000,
        );

        assert_eq!(result.added, 2);
        assert_eq!(snapshot.pulls, 1);
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.fetched_at, 1_000);
        assert_eq!(snapshot.rows[1].handle.key(), &RowKey::Logical("2".into()));
        assert_eq!(snapshot.rows[1].handle.position(), 3);
    }

    #[test]
    fn pull_keeps_identity_of_unchanged_rows() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let first = loaded(
            &schema,
            &ids,
            vec![person(1, "A"), person(2, "B"), person(3, "C")],
        );

        // Row 1 deleted externally, row 3 renamed
        let (second, result) = reconcile_pull(
            &first,
            pulled(vec![person(2, "B"), person(3, "Z")]),
            &schema,
            &ids,
            2_000,
        );

        assert_eq!(result.unchanged, 1);
        assert_eq!(result.changed, 1);
        assert_eq!(result.removed, 1);
        assert_eq!(result.added, 0);

        let b_before = &first.rows[1].handle;
        let b_after = &second.rows[0].handle;
        assert_eq!(b_after.row_id(), b_before.row_id());
        assert_eq!(b_after.version(), b_before.version());
        assert_eq!(b_after.position(), 2);

        let c_before = &first.rows[2].handle;
        let c_after = &second.rows[1].handle;
        assert_eq!(c_after.row_id(), c_before.row_id());
        assert!(c_after.version() > c_before.version());
    }

    #[test]
    fn keyless_pull_matches_by_position() {
        let schema = keyless_schema();
        let ids = LogicalClock::new();
        let link = |s: &str| Record::new().with("link", s);
        let first = loaded(&schema, &ids, vec![link("a"), link("b")]);

        let (second, result) = reconcile_pull(
            &first,
            pulled(vec![link("a"), link("c")]),
            &schema,
            &ids,
            2_000,
        );

        assert_eq!(result.unchanged, 1);
        assert_eq!(result.changed, 1);
        assert_eq!(second.rows[1].handle.key(), &RowKey::Position(3));
        assert_eq!(
            second.rows[1].handle.row_id(),
            first.rows[1].handle.row_id()
        );
    }

    #[test]
    fn duplicate_keys_get_distinct_rows() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let first = loaded(&schema, &ids, vec![person(1, "A")]);

        let (second, result) = reconcile_pull(
            &first,
            pulled(vec![person(1, "A"), person(1, "A")]),
            &schema,
            &ids,
            2_000,
        );
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.added, 1);
        assert_ne!(
            second.rows[0].handle.row_id(),
            second.rows[1].handle.row_id()
        );
    }

    #[test]
    fn confirmed_insert_appends() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);

        let applied = Applied::Inserted {
            record: person(2, "B"),
            position: 3,
        };
        let (patched, handle) = apply_confirmed(&snapshot, &applied, &schema, &ids).unwrap();
        let handle = handle.unwrap();

        assert_eq!(patched.len(), 2);
        assert_eq!(patched.revision, snapshot.revision + 1);
        assert_eq!(patched.pulls, snapshot.pulls);
        assert_eq!(handle.position(), 3);
        assert_eq!(patched.find(&handle).unwrap().record, person(2, "B"));
    }

    #[test]
    fn confirmed_insert_at_unexpected_position_drifts() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);

        let applied = Applied::Inserted {
            record: person(2, "B"),
            position: 5,
        };
        let result = apply_confirmed(&snapshot, &applied, &schema, &ids);
        assert!(matches!(
            result,
            Err(Error::PositionDrift {
                expected: 3,
                actual: 5
            })
        ));
    }

    #[test]
    fn patch_requires_loaded_snapshot() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let applied = Applied::Inserted {
            record: person(1, "A"),
            position: 2,
        };
        let result = apply_confirmed(&CacheSnapshot::empty("People"), &applied, &schema, &ids);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn confirmed_update_bumps_version() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);
        let before = snapshot.rows[0].handle.clone();

        let applied = Applied::Updated {
            handle: before.clone(),
            record: person(1, "Alice"),
            position: 2,
        };
        let (patched, handle) = apply_confirmed(&snapshot, &applied, &schema, &ids).unwrap();
        let after = handle.unwrap();

        assert_eq!(after.row_id(), before.row_id());
        assert!(after.version() > before.version());
        assert_eq!(patched.find(&before).unwrap().record, person(1, "Alice"));
    }

    #[test]
    fn confirmed_delete_shifts_later_rows() {
        let schema = keyless_schema();
        let ids = LogicalClock::new();
        let link = |s: &str| Record::new().with("link", s);
        let snapshot = loaded(&schema, &ids, vec![link("a"), link("b"), link("c")]);
        let b = snapshot.rows[1].handle.clone();
        let c = snapshot.rows[2].handle.clone();

        let applied = Applied::Deleted {
            handle: b.clone(),
            position: 3,
        };
        let (patched, handle) = apply_confirmed(&snapshot, &applied, &schema, &ids).unwrap();

        assert!(handle.is_none());
        assert_eq!(patched.len(), 2);
        assert!(patched.find(&b).is_none());
        let c_after = &patched.find(&c).unwrap().handle;
        assert_eq!(c_after.position(), 3);
        assert_eq!(c_after.key(), &RowKey::Position(3));
        assert_eq!(c_after.version(), c.version());
    }

    #[test]
    fn delete_of_unknown_row_fails() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);
        let ghost = RowHandle::new("People", 999, RowKey::Logical("9".into()), 9, 1);

        let applied = Applied::Deleted {
            handle: ghost,
            position: 9,
        };
        assert!(matches!(
            apply_confirmed(&snapshot, &applied, &schema, &ids),
            Err(Error::RowNotFound(999))
        ));
    }

    #[test]
    fn compare_remote_content() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);
        let cached = &snapshot.rows[0];

        assert_eq!(
            compare_remote(cached, Some(&person(1, "A")), &schema),
            RemoteMatch::Same
        );
        assert_eq!(
            compare_remote(cached, Some(&person(1, "B")), &schema),
            RemoteMatch::Modified
        );
        assert_eq!(
            compare_remote(cached, Some(&person(2, "A")), &schema),
            RemoteMatch::Missing
        );
        assert_eq!(compare_remote(cached, None, &schema), RemoteMatch::Missing);
    }

    #[test]
    fn version_check() {
        let schema = keyed_schema();
        let ids = LogicalClock::new();
        let snapshot = loaded(&schema, &ids, vec![person(1, "A")]);
        let cached = &snapshot.rows[0];

        assert!(check_version(&cached.handle, cached).is_ok());

        let stale = RowHandle::new(
            "People",
            cached.handle.row_id(),
            RowKey::Logical("1".into()),
            2,
            cached.handle.version() - 1,
        );
        assert!(matches!(
            check_version(&stale, cached),
            Err(ConflictReason::StaleVersion { .. })
        ));
    }

    #[test]
    fn conflict_reason_display() {
        assert_eq!(
            ConflictReason::RowDeleted.to_string(),
            "row was deleted remotely"
        );
        let stale = ConflictReason::StaleVersion {
            held: 1,
            current: 4,
        };
        assert_eq!(
            stale.to_string(),
            "handle version 1 is behind current version 4"
        );
    }
}

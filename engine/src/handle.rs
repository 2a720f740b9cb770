//! Row handles: how callers refer to a row they have seen.

use crate::{Position, RangeName, RowId, Version};
use serde::{Deserialize, Serialize};

/// The identity a handle uses to find its row in the remote sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RowKey {
    /// Value of the schema's key column, stable across row moves
    Logical(String),
    /// Last known 1-based sheet row, for sheets without a key column
    Position(Position),
}

/// An opaque reference to one row of one range.
///
/// Carries the engine-assigned row id (stable while the row lives in this
/// engine's mirror), the remote identity used to re-locate the row, the
/// position it was last seen at, and the version token of the content the
/// holder saw. Mutations through a handle whose version is no longer current
/// are rejected as conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowHandle {
    range: RangeName,
    row_id: RowId,
    key: RowKey,
    position: Position,
    version: Version,
}

impl RowHandle {
    pub fn new(
        range: impl Into<RangeName>,
        row_id: RowId,
        key: RowKey,
        position: Position,
        version: Version,
    ) -> Self {
        Self {
            range: range.into(),
            row_id,
            key,
            position,
            version,
        }
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// The logical key, if the row has one.
    pub fn logical_key(&self) -> Option<&str> {
        match &self.key {
            RowKey::Logical(k) => Some(k),
            RowKey::Position(_) => None,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Same row, seen at a different position.
    pub(crate) fn moved_to(&self, position: Position) -> Self {
        let key = match &self.key {
            RowKey::Position(_) => RowKey::Position(position),
            logical => logical.clone(),
        };
        Self {
            key,
            position,
            ..self.clone()
        }
    }

    /// Same row with new content.
    pub(crate) fn with_version(&self, version: Version, key: RowKey) -> Self {
        Self {
            key,
            version,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for RowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            RowKey::Logical(k) => write!(
                f,
                "{}[{}]@{}#v{}",
                self.range, k, self.position, self.version
            ),
            RowKey::Position(_) => write!(f, "{}@{}#v{}", self.range, self.position, self.version),
        }
    }
}

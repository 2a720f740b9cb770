//! Pending mutations queued against a range.
//!
//! Changes are expressed as mutations, not direct edits of the mirror. Each
//! mutation is stamped with a logical timestamp when it is queued and is
//! applied to the remote sheet in timestamp order.

use crate::{LogicalTimestamp, RangeName, Record, RowHandle};
use serde::{Deserialize, Serialize};

/// What a mutation does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MutationKind {
    /// Append a complete record as a new row
    Insert { record: Record },
    /// Overlay a partial record on an existing row
    Update { handle: RowHandle, patch: Record },
    /// Remove an existing row
    Delete { handle: RowHandle },
}

/// A mutation waiting in a range's write queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// Target range
    pub range: RangeName,
    /// Logical timestamp assigned at enqueue time
    pub timestamp: LogicalTimestamp,
    /// Number of remote attempts made so far
    pub attempts: u32,
    pub kind: MutationKind,
}

impl PendingMutation {
    /// Create a mutation of any kind against `range`.
    pub fn new(
        range: impl Into<RangeName>,
        timestamp: LogicalTimestamp,
        kind: MutationKind,
    ) -> Self {
        Self {
            range: range.into(),
            timestamp,
            attempts: 0,
            kind,
        }
    }

    /// Short name of the mutation kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            MutationKind::Insert { .. } => "insert",
            MutationKind::Update { .. } => "update",
            MutationKind::Delete { .. } => "delete",
        }
    }

    /// Count remote attempts spent on this mutation.
    pub fn record_attempts(&mut self, attempts: u32) {
        self.attempts = self.attempts.saturating_add(attempts);
    }
}

/// Mutations order by logical timestamp only.
impl Ord for PendingMutation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

impl PartialOrd for PendingMutation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for PendingMutation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RowKey;

    fn handle() -> RowHandle {
        RowHandle::new("Subscribers", 1, RowKey::Logical("7".into()), 2, 1)
    }

    fn delete(timestamp: u64) -> PendingMutation {
        PendingMutation::new(
            "Subscribers",
            LogicalTimestamp(timestamp),
            MutationKind::Delete { handle: handle() },
        )
    }

    #[test]
    fn new_mutation() {
        let kind = MutationKind::Insert {
            record: Record::new().with("id", 7),
        };
        let m = PendingMutation::new("Subscribers", LogicalTimestamp(1), kind);
        assert_eq!(m.range, "Subscribers");
        assert_eq!(m.attempts, 0);
        assert_eq!(m.kind_name(), "insert");
        assert_eq!(delete(2).kind_name(), "delete");
    }

    #[test]
    fn ordering_by_timestamp() {
        let a = delete(2);
        let b = PendingMutation::new(
            "Subscribers",
            LogicalTimestamp(1),
            MutationKind::Insert {
                record: Record::new(),
            },
        );
        let mut queue = vec![a.clone(), b.clone()];
        queue.sort();
        assert_eq!(queue, vec![b, a]);
    }

    #[test]
    fn attempts_accumulate() {
        let mut m = delete(1);
        m.record_attempts(2);
        m.record_attempts(3);
        assert_eq!(m.attempts, 5);
    }

    #[test]
    fn serialization_format() {
        let m = delete(4);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"type\":\"delete\""));
        let parsed: PendingMutation = serde_json::from_str(&json).unwrap();
        assert_eq!(m, parsed);
    }
}

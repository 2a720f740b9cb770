//! Predicates and lazy scans over a snapshot.

use crate::{CacheSnapshot, Record, Row, Value};
use std::sync::Arc;

/// Something that can decide whether a record matches.
///
/// Implemented for any `Fn(&Record) -> bool` and for [`Filter`].
pub trait Predicate {
    fn matches(&self, record: &Record) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Record) -> bool,
{
    fn matches(&self, record: &Record) -> bool {
        self(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    IsNull(String),
    NotNull(String),
    Contains(String, String),
}

impl Condition {
    fn holds(&self, record: &Record) -> bool {
        let null = Value::Null;
        let get = |column: &str| record.get(column).unwrap_or(&null);
        match self {
            Condition::Eq(column, value) => get(column) == value,
            Condition::Ne(column, value) => get(column) != value,
            Condition::IsNull(column) => get(column).is_null(),
            Condition::NotNull(column) => !get(column).is_null(),
            Condition::Contains(column, needle) => get(column)
                .as_text()
                .is_some_and(|text| text.to_lowercase().contains(needle)),
        }
    }
}

/// A conjunction of column conditions.
///
/// ```rust
/// use sheetsync_engine::{Filter, Predicate, Record};
///
/// let unpaid = Filter::new().eq("paid", false).not_null("name");
/// assert!(unpaid.matches(&Record::new().with("paid", false).with("name", "A")));
/// assert!(!unpaid.matches(&Record::new().with("paid", true).with("name", "A")));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// A filter that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn ne(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Ne(column.into(), value.into()));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::NotNull(column.into()));
        self
    }

    /// Case-insensitive substring match on a text column.
    pub fn contains(mut self, column: impl Into<String>, needle: &str) -> Self {
        self.conditions
            .push(Condition::Contains(column.into(), needle.to_lowercase()));
        self
    }
}

impl Predicate for Filter {
    fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.holds(record))
    }
}

/// Lazy scan of one snapshot, yielding the rows a predicate accepts.
///
/// Holds its own reference to the snapshot, so it keeps seeing the same
/// point-in-time state even if the cache moves on while it is consumed.
pub struct Matches<P> {
    snapshot: Arc<CacheSnapshot>,
    next: usize,
    predicate: P,
}

impl<P: Predicate> Matches<P> {
    pub fn new(snapshot: Arc<CacheSnapshot>, predicate: P) -> Self {
        Self {
            snapshot,
            next: 0,
            predicate,
        }
    }

    /// The snapshot being scanned.
    pub fn snapshot(&self) -> &Arc<CacheSnapshot> {
        &self.snapshot
    }
}

impl<P: Predicate> Iterator for Matches<P> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        while let Some(row) = self.snapshot.rows.get(self.next) {
            self.next += 1;
            if self.predicate.matches(&row.record) {
                return Some(row.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.snapshot.rows.len().saturating_sub(self.next)))
    }
}

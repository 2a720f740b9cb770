//! Record type for one logical row.

use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mapping from column name to typed value.
///
/// Uses a BTreeMap so records compare, print and serialize deterministically.
/// A record may be partial (an update patch) or complete; which one is
/// expected is decided by the [`Schema`](crate::Schema) that validates it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to set a column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column's value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Get a column's value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Check if a column is present (possibly as `Null`).
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over columns in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Overlay a partial record on top of this one.
    pub fn merge(&mut self, patch: &Record) {
        for (column, value) in patch.iter() {
            self.values.insert(column.clone(), value.clone());
        }
    }

    /// Return a copy of this record with a partial record overlaid.
    pub fn merged(&self, patch: &Record) -> Record {
        let mut merged = self.clone();
        merged.merge(patch);
        merged
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

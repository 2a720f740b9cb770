//! Schema definition and validation.
//!
//! A schema describes one sheet: its columns in header order, their types and
//! whether they may be empty. Schemas are immutable once built; every
//! constructor checks the invariants up front.

use crate::{error::Result, Error, Record, Value};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Decimal => write!(f, "decimal"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// Definition of a column in a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Column name, exactly as written in the header row
    pub name: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether an empty cell is allowed
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a new non-nullable column definition.
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a new nullable column definition.
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Validate a value for this column and return it in normal form.
    ///
    /// Integers are widened to decimals for decimal columns and empty text in
    /// a nullable column becomes `Null`, so that a validated record encodes
    /// and decodes back to itself.
    pub fn validate(&self, value: &Value) -> Result<Value> {
        let normalized = match (self.column_type, value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Text, Value::Text(s)) if s.is_empty() && self.nullable => Value::Null,
            (ColumnType::Text, Value::Text(_))
            | (ColumnType::Integer, Value::Integer(_))
            | (ColumnType::Boolean, Value::Boolean(_)) => value.clone(),
            (ColumnType::Timestamp, Value::Timestamp(t)) => {
                // Sheets and RFC 3339 only carry four-digit years.
                if !(0..=9999).contains(&t.year()) {
                    return Err(Error::InvalidValue {
                        column: self.name.clone(),
                        reason: format!("year {} is outside 0000-9999", t.year()),
                    });
                }
                value.clone()
            }
            (ColumnType::Decimal, Value::Integer(i)) => Value::Decimal(*i as f64),
            (ColumnType::Decimal, Value::Decimal(d)) => {
                if !d.is_finite() {
                    return Err(Error::InvalidValue {
                        column: self.name.clone(),
                        reason: format!("{d} is not a finite number"),
                    });
                }
                value.clone()
            }
            (expected, got) => {
                return Err(Error::TypeMismatch {
                    column: self.name.clone(),
                    expected: expected.to_string(),
                    got: got.type_name().to_string(),
                })
            }
        };

        if normalized.is_null() && !self.nullable {
            return Err(Error::MissingRequiredColumn(self.name.clone()));
        }
        Ok(normalized)
    }
}

/// Serialized form of a schema, checked on the way in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDef {
    columns: Vec<ColumnDef>,
    #[serde(default)]
    key: Option<String>,
}

impl TryFrom<SchemaDef> for Schema {
    type Error = Error;

    fn try_from(def: SchemaDef) -> Result<Self> {
        let schema = Schema::new(def.columns)?;
        match def.key {
            Some(key) => schema.with_key(key),
            None => Ok(schema),
        }
    }
}

/// Schema for one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", rename_all = "camelCase")]
pub struct Schema {
    columns: Vec<ColumnDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

impl Schema {
    /// Create a schema from columns in header order.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns, key: None })
    }

    /// Declare a key column holding a stable logical id for each row.
    pub fn with_key(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        match self.column(&name) {
            Some(column) if !column.nullable => {
                self.key = Some(name);
                Ok(self)
            }
            _ => Err(Error::InvalidKeyColumn(name)),
        }
    }

    /// Columns in header order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column in the header row (0-based).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Name of the key column, if the schema has one.
    pub fn key_column(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The header row this schema expects.
    pub fn header(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Check a header row read from the sheet against the schema.
    ///
    /// Trailing empty cells are ignored since sheets trim them anyway.
    pub fn check_header(&self, header: &[String]) -> Result<()> {
        let trimmed_len = header
            .iter()
            .rposition(|c| !c.trim().is_empty())
            .map_or(0, |i| i + 1);
        let actual: Vec<String> = header[..trimmed_len]
            .iter()
            .map(|c| c.trim().to_string())
            .collect();

        if actual == self.header() {
            Ok(())
        } else {
            Err(Error::HeaderMismatch {
                expected: self.header(),
                actual,
            })
        }
    }

    /// Validate a partial record (an update patch).
    ///
    /// Every column present must exist and carry a value of the right type;
    /// absent columns are left alone. Returns the record in normal form.
    pub fn validate_partial(&self, record: &Record) -> Result<Record> {
        let mut normalized = Record::new();
        for (name, value) in record.iter() {
            let column = self
                .column(name)
                .ok_or_else(|| Error::UnknownColumn(name.clone()))?;
            normalized.set(name.clone(), column.validate(value)?);
        }
        Ok(normalized)
    }

    /// Validate a complete record: a partial record whose non-nullable
    /// columns are all present. Absent nullable columns become `Null`.
    ///
    /// A record whose every cell would be blank is rejected: a blank row
    /// reads back as a gap, not as a row.
    pub fn validate_full(&self, record: &Record) -> Result<Record> {
        let mut normalized = self.validate_partial(record)?;
        for column in &self.columns {
            if !normalized.contains(&column.name) {
                if !column.nullable {
                    return Err(Error::MissingRequiredColumn(column.name.clone()));
                }
                normalized.set(column.name.clone(), Value::Null);
            }
        }
        if normalized.iter().all(|(_, v)| v.to_cell().trim().is_empty()) {
            return Err(Error::BlankRow);
        }
        Ok(normalized)
    }

    /// The key of a record as cell text, if the schema has a key column.
    pub fn key_of(&self, record: &Record) -> Option<String> {
        let key = self.key.as_deref()?;
        record
            .get(key)
            .filter(|v| !v.is_null())
            .map(Value::to_cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::required("name", ColumnType::Text),
            ColumnDef::optional("email", ColumnType::Text),
            ColumnDef::optional("balance", ColumnType::Decimal),
        ])
        .unwrap()
        .with_key("id")
        .unwrap()
    }

    #[test]
    fn validate_valid_record() {
        let schema = test_schema();

        let record = Record::new().with("id", 1).with("name", "Alice");
        let normalized = schema.validate_full(&record).unwrap();
        assert_eq!(normalized.get("email"), Some(&Value::Null));

        let full = Record::new()
            .with("id", 2)
            .with("name", "Bob")
            .with("email", "bob@example.com")
            .with("balance", 10.5);
        assert_eq!(schema.validate_full(&full).unwrap(), full);
    }

    #[test]
    fn validate_missing_required_column() {
        let schema = test_schema();

        let record = Record::new().with("name", "Alice"); // missing id
        let result = schema.validate_full(&record);

        assert_eq!(result, Err(Error::MissingRequiredColumn("id".into())));
    }

    #[test]
    fn partial_record_may_omit_required_columns() {
        let schema = test_schema();
        let patch = Record::new().with("email", "new@example.com");
        assert!(schema.validate_partial(&patch).is_ok());
    }

    #[test]
    fn validate_unknown_column() {
        let schema = test_schema();
        let patch = Record::new().with("colour", "blue");
        let result = schema.validate_partial(&patch);
        assert_eq!(result, Err(Error::UnknownColumn("colour".into())));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = test_schema();

        let record = Record::new().with("id", "seven").with("name", "Alice");
        let result = schema.validate_full(&record);

        assert_eq!(
            result,
            Err(Error::TypeMismatch {
                column: "id".into(),
                expected: "integer".into(),
                got: "text".into(),
            })
        );
    }

    #[test]
    fn validate_null_required_column() {
        let schema = test_schema();
        let patch = Record::new().with("name", Value::Null);
        let result = schema.validate_partial(&patch);
        assert_eq!(result, Err(Error::MissingRequiredColumn("name".into())));
    }

    #[test]
    fn normalization() {
        let schema = test_schema();
        let patch = Record::new().with("email", "").with("balance", 3);
        let normalized = schema.validate_partial(&patch).unwrap();
        assert_eq!(normalized.get("email"), Some(&Value::Null));
        assert_eq!(normalized.get("balance"), Some(&Value::Decimal(3.0)));

        let bad = Record::new().with("balance", f64::NAN);
        assert!(matches!(
            schema.validate_partial(&bad),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn timestamps_need_four_digit_years() {
        let schema = Schema::new(vec![ColumnDef::required("at", ColumnType::Timestamp)]).unwrap();
        let column = &schema.columns()[0];

        let far = chrono::NaiveDate::from_ymd_opt(10_000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let err = column.validate(&Value::Timestamp(far)).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));

        let before = chrono::NaiveDate::from_ymd_opt(-1, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert!(column.validate(&Value::Timestamp(before)).is_err());

        let last = chrono::NaiveDate::from_ymd_opt(9999, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc();
        assert!(column.validate(&Value::Timestamp(last)).is_ok());
    }

    #[test]
    fn blank_records_rejected() {
        let schema = test_schema();
        let blank_name = Schema::new(vec![
            ColumnDef::required("name", ColumnType::Text),
            ColumnDef::optional("note", ColumnType::Text),
        ])
        .unwrap();
        for name in ["", "   "] {
            let record = Record::new().with("name", name);
            assert_eq!(blank_name.validate_full(&record), Err(Error::BlankRow));
        }

        let nullable = Schema::new(vec![
            ColumnDef::optional("a", ColumnType::Integer),
            ColumnDef::optional("b", ColumnType::Text),
        ])
        .unwrap();
        assert_eq!(nullable.validate_full(&Record::new()), Err(Error::BlankRow));
        assert!(nullable.validate_full(&Record::new().with("a", 0)).is_ok());

        // partial records are patches and may be blank on their own
        assert!(schema
            .validate_partial(&Record::new().with("email", ""))
            .is_ok());
    }

    #[test]
    fn duplicate_columns_rejected() {
        let result = Schema::new(vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::optional("id", ColumnType::Text),
        ]);
        assert_eq!(result, Err(Error::DuplicateColumn("id".into())));
    }

    #[test]
    fn key_column_must_be_required() {
        let schema = Schema::new(vec![ColumnDef::optional("email", ColumnType::Text)]).unwrap();
        assert!(matches!(
            schema.clone().with_key("email"),
            Err(Error::InvalidKeyColumn(_))
        ));
        assert!(matches!(
            schema.with_key("missing"),
            Err(Error::InvalidKeyColumn(_))
        ));
    }

    #[test]
    fn header_check() {
        let schema = test_schema();
        let header: Vec<String> = ["id", "name", "email", "balance", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(schema.check_header(&header).is_ok());

        let wrong: Vec<String> = ["id", "email", "name", "balance"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            schema.check_header(&wrong),
            Err(Error::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn key_of_record() {
        let schema = test_schema();
        let record = Record::new().with("id", 7).with("name", "A");
        assert_eq!(schema.key_of(&record), Some("7".to_string()));
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }

    #[test]
    fn deserialization_checks_invariants() {
        let json = json!({
            "columns": [
                {"name": "id", "type": "integer"},
                {"name": "id", "type": "text", "nullable": true}
            ]
        });
        assert!(serde_json::from_value::<Schema>(json).is_err());

        let json = json!({
            "columns": [{"name": "id", "type": "integer"}],
            "key": "id"
        });
        let schema: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(schema.key_column(), Some("id"));
    }

    #[test]
    fn column_type_display() {
        assert_eq!(ColumnType::Text.to_string(), "text");
        assert_eq!(ColumnType::Timestamp.to_string(), "timestamp");
    }
}

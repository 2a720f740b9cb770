//! Error types for the sheetsync engine.

use crate::{Position, RowId};
use thiserror::Error;

/// All possible errors from the sheetsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema errors
    #[error("duplicate column in schema: {0}")]
    DuplicateColumn(String),

    #[error("invalid key column '{0}': key must be an existing non-nullable column")]
    InvalidKeyColumn(String),

    // Validation errors
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("missing required column: {0}")]
    MissingRequiredColumn(String),

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("every cell of the row would be blank")]
    BlankRow,

    // Decode errors
    #[error("row has {actual} cells, schema has {expected} columns")]
    CellCountMismatch { expected: usize, actual: usize },

    #[error("cell '{cell}' in column '{column}' is not a valid {expected}")]
    InvalidCell {
        column: String,
        cell: String,
        expected: String,
    },

    #[error("header mismatch: expected {expected:?}, found {actual:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("sheet row {position}: {source}")]
    AtRow {
        position: Position,
        #[source]
        source: Box<Error>,
    },

    // Snapshot errors
    #[error("row {0} is not in the snapshot")]
    RowNotFound(RowId),

    #[error("confirmed position {actual} does not follow the cached rows (expected {expected})")]
    PositionDrift {
        expected: Position,
        actual: Position,
    },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// True for errors that describe remote data that does not fit the schema,
    /// as opposed to a bad record supplied by a caller.
    pub fn is_malformed_row(&self) -> bool {
        match self {
            Error::AtRow { source, .. } => source.is_malformed_row(),
            other => matches!(
                other,
                Error::CellCountMismatch { .. }
                    | Error::InvalidCell { .. }
                    | Error::HeaderMismatch { .. }
            ),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

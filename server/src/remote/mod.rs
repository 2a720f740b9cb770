//! The remote spreadsheet store.
//!
//! [`RemoteStore`] is the raw, unthrottled, single-attempt interface to a
//! spreadsheet. Rate limiting and retries are layered on top by
//! [`crate::client::RateLimitedClient`].

mod memory;
mod sheets;

pub use memory::{MemorySheets, Op};
pub use sheets::SheetsClient;

use async_trait::async_trait;
use sheetsync_engine::Position;
use std::time::Duration;

use crate::credentials::AuthError;

/// One sheet row as the API returns it: cell strings in column order.
pub type Cells = Vec<String>;

/// Failures of a single remote call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("rate limited by remote store")]
    RateLimited { retry_after: Option<Duration> },

    #[error("remote request timed out")]
    Timeout,

    #[error("remote server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RemoteError {
    /// Classify an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => RemoteError::RateLimited { retry_after: None },
            408 => RemoteError::Timeout,
            401 => RemoteError::Unauthorized(message),
            403 => RemoteError::PermissionDenied(message),
            404 => RemoteError::NotFound(message),
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Rejected(message),
        }
    }

    /// True for failures worth retrying: quota, timeouts, 5xx and
    /// connection errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. }
                | RemoteError::Timeout
                | RemoteError::Server { .. }
                | RemoteError::Connection(_)
        )
    }

    /// How long the remote store asked us to wait, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result of overwriting rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConfirmation {
    pub start_row: Position,
    pub rows: usize,
}

/// Raw access to the sheets of one spreadsheet.
///
/// Sheets are addressed by title; rows by 1-based position. Reads drop
/// trailing empty cells and trailing empty rows, as the Sheets API does.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every row of the sheet, header included.
    async fn read(&self, sheet: &str) -> Result<Vec<Cells>, RemoteError>;

    /// Rows `first..=last`. Rows past the end of the data are omitted.
    async fn read_rows(
        &self,
        sheet: &str,
        first: Position,
        last: Position,
    ) -> Result<Vec<Cells>, RemoteError>;

    /// Overwrite rows starting at `start_row`.
    async fn write(
        &self,
        sheet: &str,
        start_row: Position,
        rows: Vec<Cells>,
    ) -> Result<WriteConfirmation, RemoteError>;

    /// Append a row after the last non-empty row. Returns where it landed.
    async fn append(&self, sheet: &str, row: Cells) -> Result<Position, RemoteError>;

    /// Remove a row, shifting the rows below it up by one.
    async fn delete_row(&self, sheet: &str, row: Position) -> Result<(), RemoteError>;

    /// Create the sheet if it does not exist. Returns true if it was created.
    async fn ensure_sheet(&self, sheet: &str) -> Result<bool, RemoteError>;

    /// Titles of all sheets in the spreadsheet.
    async fn sheet_titles(&self) -> Result<Vec<String>, RemoteError>;
}

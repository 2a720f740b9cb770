//! Unified error handling for the sync engine and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sheetsync_engine::{ConflictReason, RangeName, RowHandle};

use crate::credentials::AuthError;
use crate::remote::RemoteError;

/// Errors surfaced by the sync engine.
///
/// Transient remote failures never appear here directly; they are retried
/// and only show up as [`SyncError::RemoteUnavailable`] once the retry budget
/// is spent.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(#[source] sheetsync_engine::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {reason}")]
    Conflict {
        handle: Option<RowHandle>,
        reason: ConflictReason,
    },

    #[error("remote store unavailable after {attempts} attempts: {last_error}")]
    RemoteUnavailable { attempts: u32, last_error: String },

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("malformed data in '{range}': {source}")]
    MalformedRow {
        range: RangeName,
        #[source]
        source: sheetsync_engine::Error,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("remote store rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected remote response: {0}")]
    Protocol(String),

    #[error("unknown range: {0}")]
    UnknownRange(String),

    #[error("engine is shutting down")]
    Shutdown,
}

impl SyncError {
    /// Classify an engine-crate error raised while working on `range`.
    pub fn engine(range: &str, error: sheetsync_engine::Error) -> Self {
        match error {
            e if e.is_malformed_row() => SyncError::MalformedRow {
                range: range.to_string(),
                source: e,
            },
            sheetsync_engine::Error::RowNotFound(row_id) => {
                SyncError::NotFound(format!("row {row_id} in '{range}'"))
            }
            e => SyncError::Validation(e),
        }
    }

    pub fn conflict(handle: &RowHandle, reason: ConflictReason) -> Self {
        SyncError::Conflict {
            handle: Some(handle.clone()),
            reason,
        }
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation",
            SyncError::NotFound(_) => "not_found",
            SyncError::Conflict { .. } => "conflict",
            SyncError::RemoteUnavailable { .. } => "remote_unavailable",
            SyncError::Auth(_) => "auth",
            SyncError::MalformedRow { .. } => "malformed_row",
            SyncError::PermissionDenied(_) => "permission_denied",
            SyncError::Rejected(_) => "rejected",
            SyncError::Protocol(_) => "protocol",
            SyncError::UnknownRange(_) => "unknown_range",
            SyncError::Shutdown => "shutdown",
        }
    }
}

impl From<RemoteError> for SyncError {
    /// Map a permanent remote failure. Exhausted transient failures are
    /// mapped by the retry layer, which knows the attempt count.
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Auth(e) => SyncError::Auth(e),
            RemoteError::Unauthorized(msg) => SyncError::Auth(AuthError::Refused(msg)),
            RemoteError::PermissionDenied(msg) => SyncError::PermissionDenied(msg),
            RemoteError::NotFound(msg) => SyncError::NotFound(msg),
            RemoteError::Rejected(msg) => SyncError::Rejected(msg),
            RemoteError::Protocol(msg) => SyncError::Protocol(msg),
            transient => SyncError::RemoteUnavailable {
                attempts: 1,
                last_error: transient.to_string(),
            },
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) | SyncError::UnknownRange(_) => StatusCode::NOT_FOUND,
            SyncError::Conflict { .. } => StatusCode::CONFLICT,
            SyncError::RemoteUnavailable { .. } | SyncError::Shutdown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SyncError::Auth(_)
            | SyncError::MalformedRow { .. }
            | SyncError::PermissionDenied(_)
            | SyncError::Rejected(_)
            | SyncError::Protocol(_) => {
                tracing::error!("Remote store error: {}", self);
                StatusCode::BAD_GATEWAY
            }
        };

        let body = Json(ErrorResponse {
            error: self.kind(),
            details: Some(self.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsync_engine::Error;

    #[test]
    fn engine_errors_are_classified() {
        let err = SyncError::engine("People", Error::UnknownColumn("colour".into()));
        assert_eq!(err.kind(), "validation");

        let err = SyncError::engine(
            "People",
            Error::CellCountMismatch {
                expected: 3,
                actual: 4,
            },
        );
        assert_eq!(err.kind(), "malformed_row");
        assert!(err.to_string().contains("People"));

        let err = SyncError::engine("People", Error::RowNotFound(9));
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn permanent_remote_errors_map_to_kinds() {
        assert_eq!(
            SyncError::from(RemoteError::PermissionDenied("no".into())).kind(),
            "permission_denied"
        );
        assert_eq!(
            SyncError::from(RemoteError::Unauthorized("expired".into())).kind(),
            "auth"
        );
        assert_eq!(
            SyncError::from(RemoteError::Rejected("bad range".into())).kind(),
            "rejected"
        );
    }

    #[test]
    fn status_codes() {
        let conflict = SyncError::Conflict {
            handle: None,
            reason: ConflictReason::RowDeleted,
        };
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let unavailable = SyncError::RemoteUnavailable {
            attempts: 5,
            last_error: "timeout".into(),
        };
        assert_eq!(
            unavailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let unknown = SyncError::UnknownRange("Nope".into());
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);
    }
}

//! # Sheetsync Engine
//!
//! Deterministic building blocks for mirroring spreadsheet ranges as typed
//! tables.
//!
//! This crate holds everything about the sync engine that can be expressed
//! without touching the network: the row codec, cache snapshots, pending
//! mutations and the reconciliation rules that keep a local mirror in step
//! with a remote, positionally indexed sheet.
//!
//! ## Design Principles
//!
//! - **No IO**: the crate has no knowledge of HTTP, tokens or timers
//! - **Deterministic**: the same rows and mutations always produce the same snapshot
//! - **Immutable snapshots**: every refresh or patch produces a new [`CacheSnapshot`]
//!
//! ## Core Concepts
//!
//! ### Schemas and Records
//!
//! A [`Schema`] is the ordered list of columns of one sheet, matching its
//! header row exactly. A [`Record`] maps column names to typed [`Value`]s.
//! The [`codec`] module converts between records and the raw cell strings
//! a spreadsheet API hands out.
//!
//! ### Row Handles
//!
//! Spreadsheet rows are addressed by position, which other editors can
//! change at any time. A [`RowHandle`] pairs the best available identity
//! (a logical key column, else the last known position) with a version
//! token, so stale handles are detected rather than trusted.
//!
//! ### Mutations and Reconciliation
//!
//! Changes are queued as [`PendingMutation`]s stamped by a [`LogicalClock`].
//! Once the remote store confirms a write, [`reconcile::apply_confirmed`]
//! patches the snapshot in place; a full pull goes through
//! [`reconcile::reconcile_pull`], which carries row ids and versions over
//! for rows that did not change.
//!
//! ## Quick Start
//!
//! ```rust
//! use sheetsync_engine::{codec, ColumnDef, ColumnType, Record, Schema};
//!
//! let schema = Schema::new(vec![
//!     ColumnDef::required("id", ColumnType::Integer),
//!     ColumnDef::required("name", ColumnType::Text),
//!     ColumnDef::optional("paid", ColumnType::Boolean),
//! ])
//! .unwrap()
//! .with_key("id")
//! .unwrap();
//!
//! let record = Record::new().with("id", 7).with("name", "A").with("paid", false);
//! let cells = codec::encode(&record, &schema).unwrap();
//! assert_eq!(cells, vec!["7", "A", "FALSE"]);
//!
//! let decoded = codec::decode(&cells, &schema).unwrap();
//! assert_eq!(decoded, record);
//! ```

pub mod clock;
pub mod codec;
pub mod error;
pub mod handle;
pub mod mutation;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod value;

// Re-export main types at crate root
pub use clock::{LogicalClock, LogicalTimestamp};
pub use error::Error;
pub use handle::{RowHandle, RowKey};
pub use mutation::{MutationKind, PendingMutation};
pub use query::{Filter, Matches, Predicate};
pub use reconcile::{Applied, ConflictReason, PulledRow, ReconcileResult, RemoteMatch};
pub use record::Record;
pub use schema::{ColumnDef, ColumnType, Schema};
pub use snapshot::{CacheSnapshot, Row, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use value::Value;

/// Type aliases for clarity
pub type RangeName = String;
pub type RowId = u64;
pub type Version = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
/// 1-based sheet row index. Row 1 holds the header.
pub type Position = u32;

/// Sheet row of the header; data rows start right after it.
pub const HEADER_ROW: Position = 1;

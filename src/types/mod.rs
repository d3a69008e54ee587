//! Type definitions for all gateway data structures

/// Resolved caller identity
pub mod claims;

/// Row deltas and their identities
pub mod delta;

/// Error types and result alias
pub mod error;

/// Sync-rules data model
pub mod rules;

/// Table schemas
pub mod schema;

pub use claims::ResolvedClaims;
pub use delta::{ColumnDelta, DeltaOp, RowDelta, RowKey};
pub use error::{AdapterError, Error, Result};
pub use rules::{Bucket, FilterOp, RuleFilter, SyncRules};
pub use schema::{ColumnSchema, ColumnType, TableSchema};

//! Row-level change records and their deterministic identities
//!
//! A delta is one INSERT, UPDATE, or DELETE against one row of one
//! table. Its `delta_id` is content-derived: SHA-256 over a stable JSON
//! serialisation of `(clientId, hlc-as-string, table, rowId, columns)`,
//! so any two parties computing the id for the same delta agree and
//! duplicates can be dropped idempotently.

use crate::clock::Hlc;
use crate::types::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Kind of row change carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    /// Row creation; carries the full initial column set
    Insert,
    /// Partial row update; carries only changed columns
    Update,
    /// Row tombstone; carries no columns
    Delete,
}

/// A single column assignment inside a delta.
///
/// `value` is any JSON-representable scalar or object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDelta {
    /// Column name
    pub column: String,
    /// New value for the column
    pub value: Value,
}

/// Identity of the row a delta targets. LWW merging runs over this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    /// Table the row lives in
    pub table: String,
    /// Row identifier within the table
    pub row_id: String,
}

/// One row-level change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDelta {
    /// Operation kind
    pub op: DeltaOp,
    /// Target table
    pub table: String,
    /// Target row within the table
    pub row_id: String,
    /// Originating client
    pub client_id: String,
    /// Ordered column assignments; empty for DELETE
    #[serde(default)]
    pub columns: Vec<ColumnDelta>,
    /// Hybrid logical timestamp assigned by the originating clock
    pub hlc: Hlc,
    /// Content-derived identity (SHA-256 hex)
    pub delta_id: String,
}

impl RowDelta {
    /// Build a delta and stamp its content-derived id.
    pub fn new(
        op: DeltaOp,
        table: impl Into<String>,
        row_id: impl Into<String>,
        client_id: impl Into<String>,
        columns: Vec<ColumnDelta>,
        hlc: Hlc,
    ) -> Self {
        let mut delta = Self {
            op,
            table: table.into(),
            row_id: row_id.into(),
            client_id: client_id.into(),
            columns,
            hlc,
            delta_id: String::new(),
        };
        delta.delta_id = delta.compute_delta_id();
        delta
    }

    /// The `(table, rowId)` identity this delta targets.
    pub fn row_key(&self) -> RowKey {
        RowKey {
            table: self.table.clone(),
            row_id: self.row_id.clone(),
        }
    }

    /// Recompute the deterministic delta id from current fields.
    ///
    /// The serialisation sorts object keys lexicographically (serde_json
    /// maps are ordered), so the result is independent of the key order
    /// any upstream encoder happened to use.
    pub fn compute_delta_id(&self) -> String {
        let payload = serde_json::json!([
            self.client_id,
            self.hlc.to_string(),
            self.table,
            self.row_id,
            self.columns,
        ]);
        let digest = Sha256::digest(payload.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Validate structural invariants and the id, restamping when absent.
    ///
    /// DELETE must carry no columns; INSERT/UPDATE must carry at least
    /// one. An id supplied by the client is preserved only if it matches
    /// the recomputed value.
    pub fn normalize(mut self) -> Result<Self> {
        match self.op {
            DeltaOp::Delete => {
                if !self.columns.is_empty() {
                    return Err(Error::validation(format!(
                        "DELETE delta for {}/{} must not carry columns",
                        self.table, self.row_id
                    )));
                }
            }
            DeltaOp::Insert | DeltaOp::Update => {
                if self.columns.is_empty() {
                    return Err(Error::validation(format!(
                        "{:?} delta for {}/{} carries no columns",
                        self.op, self.table, self.row_id
                    )));
                }
            }
        }
        if self.table.is_empty() || self.row_id.is_empty() || self.client_id.is_empty() {
            return Err(Error::validation(
                "delta requires non-empty table, rowId and clientId",
            ));
        }
        let expected = self.compute_delta_id();
        if self.delta_id.is_empty() {
            self.delta_id = expected;
        } else if self.delta_id != expected {
            return Err(Error::validation(format!(
                "deltaId {} does not match content (expected {})",
                self.delta_id, expected
            )));
        }
        Ok(self)
    }

    /// Approximate in-memory footprint, used for buffer accounting.
    pub fn approx_size(&self) -> usize {
        let columns: usize = self
            .columns
            .iter()
            .map(|c| c.column.len() + json_size(&c.value) + 16)
            .sum();
        self.table.len() + self.row_id.len() + self.client_id.len() + self.delta_id.len()
            + columns
            + 64
    }

    /// Value of a named column, if this delta assigns it.
    pub fn column_value(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|c| c.column == name).map(|c| &c.value)
    }
}

/// Rough serialized size of a JSON value.
fn json_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(n) => n.to_string().len(),
        Value::String(s) => s.len() + 2,
        Value::Array(items) => items.iter().map(json_size).sum::<usize>() + 2,
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.len() + json_size(v) + 4)
            .sum::<usize>()
            + 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hlc: u64) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            "tasks",
            "r1",
            "client-a",
            vec![ColumnDelta {
                column: "title".into(),
                value: Value::String("A".into()),
            }],
            Hlc::from_u64(hlc),
        )
    }

    #[test]
    fn test_delta_id_is_recomputable() {
        let delta = sample(100);
        assert_eq!(delta.delta_id, delta.compute_delta_id());
        assert_eq!(delta.delta_id.len(), 64);
    }

    #[test]
    fn test_delta_id_independent_of_value_key_order() {
        let ordered = serde_json::json!({"a": 1, "b": 2});
        let reversed: Value =
            serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let make = |v: Value| {
            RowDelta::new(
                DeltaOp::Update,
                "t",
                "r",
                "c",
                vec![ColumnDelta { column: "payload".into(), value: v }],
                Hlc::from_u64(7),
            )
        };
        assert_eq!(make(ordered).delta_id, make(reversed).delta_id);
    }

    #[test]
    fn test_delta_id_sensitive_to_every_field() {
        let base = sample(100);
        assert_ne!(base.delta_id, sample(101).delta_id);
        let mut other = sample(100);
        other.client_id = "client-b".into();
        assert_ne!(base.delta_id, other.compute_delta_id());
    }

    #[test]
    fn test_normalize_rejects_delete_with_columns() {
        let mut delta = sample(1);
        delta.op = DeltaOp::Delete;
        assert!(delta.normalize().is_err());
    }

    #[test]
    fn test_normalize_rejects_empty_update() {
        let mut delta = sample(1);
        delta.columns.clear();
        delta.delta_id.clear();
        assert!(delta.normalize().is_err());
    }

    #[test]
    fn test_normalize_restamps_missing_id() {
        let mut delta = sample(1);
        let expected = delta.delta_id.clone();
        delta.delta_id = String::new();
        let delta = delta.normalize().unwrap();
        assert_eq!(delta.delta_id, expected);
    }

    #[test]
    fn test_normalize_rejects_forged_id() {
        let mut delta = sample(1);
        delta.delta_id = "0".repeat(64);
        assert!(delta.normalize().is_err());
    }

    #[test]
    fn test_json_shape_uses_camel_case_and_string_hlc() {
        let delta = sample(123);
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["op"], "INSERT");
        assert_eq!(json["rowId"], "r1");
        assert_eq!(json["clientId"], "client-a");
        assert_eq!(json["hlc"], "123");
        assert!(json["deltaId"].as_str().is_some());
    }
}

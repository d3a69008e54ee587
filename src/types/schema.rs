//! Table schemas used to validate and shape incoming deltas
//!
//! Schemas are optional: a gateway without a cached schema accepts any
//! column set. When a schema is present it acts as a column allow-list
//! (unknown columns are dropped during extraction) and a type check
//! (incompatible values fail the push with a schema mismatch).

use crate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
use crate::types::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column value types a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 text
    String,
    /// JSON number
    Number,
    /// JSON boolean
    Boolean,
    /// Arbitrary JSON (object, array, or scalar)
    Json,
    /// Always-null column
    Null,
}

impl ColumnType {
    /// Whether a JSON value is acceptable for this column type.
    ///
    /// Null is accepted for every type; absent columns are represented
    /// as null in flushed files.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::String, Value::String(_)) => true,
            (ColumnType::Number, Value::Number(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Json, _) => true,
            _ => false,
        }
    }
}

/// Declared column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Schema for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub table: String,
    /// Declared columns
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Look up a declared column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Structural validation of a schema document.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::validation("schema table name must be non-empty"));
        }
        if self.columns.is_empty() {
            return Err(Error::validation("schema must declare at least one column"));
        }
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(Error::validation(format!(
                    "schema for table {} declares an unnamed column",
                    self.table
                )));
            }
        }
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.columns.len() {
            return Err(Error::validation(format!(
                "schema for table {} declares duplicate columns",
                self.table
            )));
        }
        Ok(())
    }

    /// Apply this schema to a delta targeting its table.
    ///
    /// Unknown columns are dropped; a value of the wrong type fails the
    /// whole delta. Deltas for other tables pass through untouched.
    /// The delta id is restamped when the column set changed.
    pub fn apply(&self, delta: RowDelta) -> Result<RowDelta> {
        if delta.table != self.table || delta.op == DeltaOp::Delete {
            return Ok(delta);
        }
        let mut kept: Vec<ColumnDelta> = Vec::with_capacity(delta.columns.len());
        for column in delta.columns {
            match self.column(&column.column) {
                None => continue,
                Some(declared) => {
                    if !declared.column_type.accepts(&column.value) {
                        return Err(Error::schema_mismatch(format!(
                            "column {} of table {} expects {:?}, got {}",
                            column.column,
                            self.table,
                            declared.column_type,
                            type_name(&column.value)
                        )));
                    }
                    kept.push(column);
                }
            }
        }
        if kept.is_empty() {
            return Err(Error::schema_mismatch(format!(
                "delta for {}/{} has no columns left after schema filtering",
                delta.table, delta.row_id
            )));
        }
        let mut shaped = RowDelta { columns: kept, ..delta };
        shaped.delta_id = shaped.compute_delta_id();
        Ok(shaped)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

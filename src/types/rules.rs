//! Sync-rules data model
//!
//! A rule set is a versioned list of buckets. Each bucket names the
//! tables it covers (empty list = all tables) and a conjunction of
//! row-level filters. Filter values of the form `jwt:<claim>` are
//! substituted with the caller's resolved claims at evaluation time;
//! evaluation itself lives in [`crate::rules`].

use crate::types::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Comparison operators a filter may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal to any resolved value
    Eq,
    /// Equal to none of the resolved values
    Neq,
    /// Member of the resolved value list
    In,
    /// Greater than the first resolved value
    Gt,
    /// Less than the first resolved value
    Lt,
    /// Greater than or equal to the first resolved value
    Gte,
    /// Less than or equal to the first resolved value
    Lte,
}

/// One row-level predicate inside a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    /// Delta column the predicate reads
    pub column: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Literal value, or `jwt:<claim>` for claim substitution
    pub value: String,
}

/// A named subset of tables and row predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Unique bucket name within the rule set
    pub name: String,
    /// Tables the bucket covers; empty means all tables
    #[serde(default)]
    pub tables: Vec<String>,
    /// Conjunction of row predicates; empty means no row predicate
    #[serde(default)]
    pub filters: Vec<RuleFilter>,
}

/// A versioned set of buckets.
///
/// A delta passes the rule set when it matches at least one bucket; a
/// rule set with no buckets passes everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRules {
    /// Monotonically increasing rule-set version
    pub version: u32,
    /// Buckets making up the rule set
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

impl SyncRules {
    /// An empty rule set that admits every delta.
    pub fn permit_all() -> Self {
        Self { version: 1, buckets: Vec::new() }
    }

    /// Structural validation of a rule-set document.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(Error::validation("sync-rules version must be positive"));
        }
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            if bucket.name.is_empty() {
                return Err(Error::validation("bucket name must be non-empty"));
            }
            if !seen.insert(bucket.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate bucket name: {}",
                    bucket.name
                )));
            }
            for table in &bucket.tables {
                if table.is_empty() {
                    return Err(Error::validation(format!(
                        "bucket {} lists an empty table name",
                        bucket.name
                    )));
                }
            }
            for filter in &bucket.filters {
                if filter.column.is_empty() {
                    return Err(Error::validation(format!(
                        "bucket {} has a filter with an empty column",
                        bucket.name
                    )));
                }
                if filter.value.is_empty() {
                    return Err(Error::validation(format!(
                        "bucket {} filter on {} has an empty value",
                        bucket.name, filter.column
                    )));
                }
            }
        }
        Ok(())
    }
}

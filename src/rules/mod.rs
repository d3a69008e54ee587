//! Sync-rules evaluation
//!
//! Decides which deltas a given caller is allowed to receive. Buckets
//! are evaluated against the caller's resolved claims; `jwt:<claim>`
//! filter values substitute the named claim at evaluation time. A delta
//! passes when at least one bucket admits it; an empty rule set admits
//! everything.

use crate::types::claims::ResolvedClaims;
use crate::types::delta::RowDelta;
use crate::types::rules::{Bucket, FilterOp, RuleFilter, SyncRules};
use serde_json::Value;
use std::cmp::Ordering;

/// Everything needed to evaluate rules for one caller.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Rule set active on the gateway
    pub rules: &'a SyncRules,
    /// Caller's verified claims
    pub claims: &'a ResolvedClaims,
}

/// Resolve a filter value into the list it stands for.
///
/// `jwt:<claim>` expands to the caller's claim values (possibly empty);
/// any other literal is a one-element list.
pub fn resolve_filter_value(value: &str, claims: &ResolvedClaims) -> Vec<String> {
    match value.strip_prefix("jwt:") {
        Some(claim) => claims.claim_values(claim),
        None => vec![value.to_string()],
    }
}

/// Render a delta column value the way filters compare it.
fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ordering used by the range operators: numeric when both sides parse
/// as finite numbers, lexicographic otherwise.
fn compare(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) if l.is_finite() && r.is_finite() => {
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        _ => left.cmp(right),
    }
}

/// Evaluate one filter against one delta.
pub fn filter_matches_delta(delta: &RowDelta, filter: &RuleFilter, claims: &ResolvedClaims) -> bool {
    let Some(value) = delta.column_value(&filter.column) else {
        return false;
    };
    let delta_value = value_as_string(value);
    let resolved = resolve_filter_value(&filter.value, claims);
    if resolved.is_empty() {
        return false;
    }
    match filter.op {
        FilterOp::Eq | FilterOp::In => resolved.contains(&delta_value),
        FilterOp::Neq => !resolved.contains(&delta_value),
        FilterOp::Gt => compare(&delta_value, &resolved[0]) == Ordering::Greater,
        FilterOp::Lt => compare(&delta_value, &resolved[0]) == Ordering::Less,
        FilterOp::Gte => compare(&delta_value, &resolved[0]) != Ordering::Less,
        FilterOp::Lte => compare(&delta_value, &resolved[0]) != Ordering::Greater,
    }
}

/// Whether a bucket admits a delta: table coverage plus every filter.
pub fn delta_matches_bucket(delta: &RowDelta, bucket: &Bucket, claims: &ResolvedClaims) -> bool {
    if !bucket.tables.is_empty() && !bucket.tables.iter().any(|t| t == &delta.table) {
        return false;
    }
    bucket
        .filters
        .iter()
        .all(|filter| filter_matches_delta(delta, filter, claims))
}

/// Keep the deltas the caller is allowed to see.
pub fn filter_deltas(deltas: Vec<RowDelta>, ctx: EvalContext<'_>) -> Vec<RowDelta> {
    if ctx.rules.buckets.is_empty() {
        return deltas;
    }
    deltas
        .into_iter()
        .filter(|delta| {
            ctx.rules
                .buckets
                .iter()
                .any(|bucket| delta_matches_bucket(delta, bucket, ctx.claims))
        })
        .collect()
}

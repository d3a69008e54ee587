//! Shard configuration and pure routing helpers
//!
//! A shard config maps tables to owning gateways. A table belongs to
//! the first shard listing it; unlisted tables fall through to the
//! default gateway. Parsing is strict and total: any malformed document
//! yields `None` rather than a partially usable config.

use crate::clock::Hlc;
use crate::delta::codec::SyncResponse;
use crate::types::delta::RowDelta;
use serde::Deserialize;
use std::collections::HashMap;

/// One shard: the tables it owns and the gateway serving them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    /// Tables owned by this shard; never empty
    pub tables: Vec<String>,
    /// Gateway serving the shard
    pub gateway_id: String,
}

/// Full shard layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardConfig {
    /// Declared shards, in priority order
    pub shards: Vec<Shard>,
    /// Gateway for tables no shard lists
    #[serde(rename = "default")]
    pub default_gateway: String,
}

/// Parse a shard config document.
///
/// Returns `None` on invalid JSON, a non-object root, a missing or
/// empty `default`, a non-array `shards`, a shard without a gateway id,
/// or a shard whose `tables` is empty or holds non-strings.
pub fn parse_shard_config(raw: &str) -> Option<ShardConfig> {
    let config: ShardConfig = serde_json::from_str(raw).ok()?;
    if config.default_gateway.is_empty() {
        return None;
    }
    for shard in &config.shards {
        if shard.gateway_id.is_empty() {
            return None;
        }
        if shard.tables.is_empty() || shard.tables.iter().any(String::is_empty) {
            return None;
        }
    }
    Some(config)
}

impl ShardConfig {
    /// Gateway owning a table: first shard listing it, else the default.
    pub fn shard_for_table(&self, table: &str) -> &str {
        self.shards
            .iter()
            .find(|shard| shard.tables.iter().any(|t| t == table))
            .map(|shard| shard.gateway_id.as_str())
            .unwrap_or(&self.default_gateway)
    }

    /// Every gateway id in the layout (shards plus default), deduplicated.
    pub fn all_gateway_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.shards.len() + 1);
        for shard in &self.shards {
            if !ids.contains(&shard.gateway_id) {
                ids.push(shard.gateway_id.clone());
            }
        }
        if !ids.contains(&self.default_gateway) {
            ids.push(self.default_gateway.clone());
        }
        ids
    }
}

/// Gateways responsible for a set of tables, deduplicated.
///
/// An empty table list means "could touch anything" and returns every
/// gateway in the layout.
pub fn resolve_shard_gateway_ids(config: &ShardConfig, tables: &[String]) -> Vec<String> {
    if tables.is_empty() {
        return config.all_gateway_ids();
    }
    let mut ids = Vec::new();
    for table in tables {
        let id = config.shard_for_table(table);
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Unique table names across a delta batch, in first-seen order.
pub fn extract_table_names(deltas: &[RowDelta]) -> Vec<String> {
    let mut tables = Vec::new();
    for delta in deltas {
        if !tables.contains(&delta.table) {
            tables.push(delta.table.clone());
        }
    }
    tables
}

/// Split a delta batch by owning gateway, preserving order per bucket.
pub fn partition_deltas_by_shard(
    config: &ShardConfig,
    deltas: Vec<RowDelta>,
) -> HashMap<String, Vec<RowDelta>> {
    let mut partitions: HashMap<String, Vec<RowDelta>> = HashMap::new();
    for delta in deltas {
        let gateway = config.shard_for_table(&delta.table).to_string();
        partitions.entry(gateway).or_default().push(delta);
    }
    partitions
}

/// Merge per-shard pull responses into one stream.
///
/// Deltas are stably sorted ascending by HLC (ties keep input order),
/// the server HLC is the maximum observed, and `hasMore` is the OR.
pub fn merge_pull_responses(responses: Vec<SyncResponse>) -> SyncResponse {
    let mut server_hlc = Hlc::ZERO;
    let mut has_more = false;
    let mut deltas = Vec::new();
    for response in responses {
        server_hlc = server_hlc.max(response.server_hlc);
        has_more |= response.has_more;
        deltas.extend(response.deltas);
    }
    deltas.sort_by_key(|delta| delta.hlc);
    SyncResponse { deltas, server_hlc, has_more }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::delta::{ColumnDelta, DeltaOp};
    use proptest::prelude::*;
    use serde_json::Value;

    fn config() -> ShardConfig {
        parse_shard_config(
            r#"{
                "shards": [
                    {"tables": ["users", "profiles"], "gatewayId": "A"},
                    {"tables": ["orders"], "gatewayId": "B"}
                ],
                "default": "D"
            }"#,
        )
        .unwrap()
    }

    fn delta(table: &str, hlc: u64) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            table,
            "r",
            "c",
            vec![ColumnDelta { column: "x".into(), value: Value::Null }],
            Hlc::from_u64(hlc),
        )
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_shard_config("not json").is_none());
        assert!(parse_shard_config("[1,2]").is_none());
        assert!(parse_shard_config(r#"{"shards": [], "default": ""}"#).is_none());
        assert!(parse_shard_config(r#"{"shards": {}, "default": "D"}"#).is_none());
        assert!(parse_shard_config(
            r#"{"shards": [{"tables": [], "gatewayId": "A"}], "default": "D"}"#
        )
        .is_none());
        assert!(parse_shard_config(
            r#"{"shards": [{"tables": ["t"], "gatewayId": ""}], "default": "D"}"#
        )
        .is_none());
        assert!(parse_shard_config(
            r#"{"shards": [{"tables": [1], "gatewayId": "A"}], "default": "D"}"#
        )
        .is_none());
        assert!(parse_shard_config(r#"{"default": "D"}"#).is_none());
    }

    #[test]
    fn test_parse_accepts_empty_shard_list() {
        let config = parse_shard_config(r#"{"shards": [], "default": "D"}"#).unwrap();
        assert_eq!(config.all_gateway_ids(), vec!["D"]);
    }

    #[test]
    fn test_table_resolution() {
        let config = config();
        assert_eq!(config.shard_for_table("users"), "A");
        assert_eq!(config.shard_for_table("orders"), "B");
        assert_eq!(config.shard_for_table("logs"), "D");
    }

    #[test]
    fn test_resolve_gateway_ids() {
        let config = config();
        let ids = resolve_shard_gateway_ids(&config, &["users".into(), "logs".into()]);
        assert_eq!(ids, vec!["A", "D"]);
        // Empty table list means every gateway.
        let all = resolve_shard_gateway_ids(&config, &[]);
        assert_eq!(all, vec!["A", "B", "D"]);
    }

    #[test]
    fn test_extract_table_names_dedupes() {
        let tables = extract_table_names(&[delta("users", 1), delta("orders", 2), delta("users", 3)]);
        assert_eq!(tables, vec!["users", "orders"]);
    }

    #[test]
    fn test_partition_by_shard() {
        let config = config();
        let partitions = partition_deltas_by_shard(
            &config,
            vec![delta("users", 1), delta("orders", 2), delta("logs", 3)],
        );
        assert_eq!(partitions["A"].len(), 1);
        assert_eq!(partitions["B"].len(), 1);
        assert_eq!(partitions["D"].len(), 1);
        assert_eq!(partitions["A"][0].table, "users");
        assert_eq!(partitions["D"][0].table, "logs");
    }

    #[test]
    fn test_merge_pull_responses() {
        let merged = merge_pull_responses(vec![
            SyncResponse {
                deltas: vec![delta("a", 30), delta("a", 10)],
                server_hlc: Hlc::from_u64(500),
                has_more: false,
            },
            SyncResponse {
                deltas: vec![delta("b", 20)],
                server_hlc: Hlc::from_u64(700),
                has_more: true,
            },
        ]);
        let hlcs: Vec<u64> = merged.deltas.iter().map(|d| d.hlc.as_u64()).collect();
        assert_eq!(hlcs, vec![10, 20, 30]);
        assert_eq!(merged.server_hlc, Hlc::from_u64(700));
        assert!(merged.has_more);
    }

    #[test]
    fn test_merge_is_stable_for_equal_hlcs() {
        let first = delta("a", 50);
        let second = delta("b", 50);
        let merged = merge_pull_responses(vec![
            SyncResponse { deltas: vec![first.clone()], server_hlc: Hlc::ZERO, has_more: false },
            SyncResponse { deltas: vec![second.clone()], server_hlc: Hlc::ZERO, has_more: false },
        ]);
        assert_eq!(merged.deltas, vec![first, second]);
    }

    proptest! {
        /// Partitioning never loses or duplicates a delta, and every
        /// delta lands in the bucket its table resolves to.
        #[test]
        fn prop_partition_fidelity(tables in prop::collection::vec("users|orders|logs|misc", 0..40)) {
            let config = config();
            let deltas: Vec<RowDelta> = tables
                .iter()
                .enumerate()
                .map(|(i, table)| delta(table, (i as u64 + 1) * 10))
                .collect();
            let partitions = partition_deltas_by_shard(&config, deltas.clone());
            let total: usize = partitions.values().map(Vec::len).sum();
            prop_assert_eq!(total, deltas.len());
            for (gateway, bucket) in &partitions {
                for d in bucket {
                    prop_assert_eq!(config.shard_for_table(&d.table), gateway.as_str());
                }
            }
        }

        /// Merged streams are non-decreasing in HLC.
        #[test]
        fn prop_merge_sorted(
            a in prop::collection::vec(1u64..1_000, 0..20),
            b in prop::collection::vec(1u64..1_000, 0..20),
        ) {
            let make = |hlcs: &Vec<u64>| SyncResponse {
                deltas: hlcs.iter().map(|&h| delta("t", h)).collect(),
                server_hlc: Hlc::from_u64(hlcs.iter().copied().max().unwrap_or(0)),
                has_more: false,
            };
            let (ra, rb) = (make(&a), make(&b));
            let expected_hlc = ra.server_hlc.max(rb.server_hlc);
            let merged = merge_pull_responses(vec![ra, rb]);
            prop_assert!(merged.deltas.windows(2).all(|w| w[0].hlc <= w[1].hlc));
            prop_assert_eq!(merged.server_hlc, expected_hlc);
        }
    }
}

//! Table-based sharding: config, pure routing helpers, HTTP fan-out

/// Shard configuration and pure helpers
pub mod config;

/// Fan-out router
pub mod router;


pub use config::{
    extract_table_names, merge_pull_responses, parse_shard_config, partition_deltas_by_shard,
    resolve_shard_gateway_ids, Shard, ShardConfig,
};
pub use router::{AdminAck, BroadcastPayload, PushAck, ShardRouter, UpstreamError};

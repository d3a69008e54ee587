//! Shard fan-out over HTTP
//!
//! When a shard config is active, the public sync routes stop touching
//! sessions directly: pushes are partitioned and posted to the owning
//! gateways, pulls and checkpoints fan out to every gateway and merge,
//! admin calls are all-or-nothing. Fan-out targets the loopback
//! `/internal/gateway/...` routes of the local process by default; an
//! operator can point individual gateway ids at peer processes.

use crate::clock::Hlc;
use crate::delta::codec::{decode_body, encode_body, SyncPush, SyncResponse};
use crate::shard::config::{
    extract_table_names, partition_deltas_by_shard, resolve_shard_gateway_ids, ShardConfig,
};
use crate::types::delta::RowDelta;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the checkpoint snapshot HLC.
pub const X_CHECKPOINT_HLC: &str = "x-checkpoint-hlc";

/// Acknowledgement body of a push.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    /// Deltas newly represented
    pub accepted: usize,
    /// Server HLC after the push
    pub server_hlc: Hlc,
}

/// Acknowledgement body of a sharded admin call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdminAck {
    /// Always true on the success path
    pub applied: bool,
    /// Number of shards the call reached
    pub shards: usize,
}

/// Payload of a cross-shard broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    /// Deltas ingested on the source shard
    pub deltas: Vec<RowDelta>,
    /// Server HLC at ingest time
    pub server_hlc: Hlc,
    /// Client whose own sockets should not receive the echo
    pub exclude_client_id: Option<String>,
}

/// A failure surfaced from fan-out.
#[derive(Debug)]
pub enum UpstreamError {
    /// A shard answered with a non-2xx status; body passed through verbatim
    Status {
        /// Upstream status code
        status: u16,
        /// Upstream response body
        body: String,
    },
    /// A shard could not be reached at all
    Transport(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Status { status, body } => write!(f, "shard returned {status}: {body}"),
            UpstreamError::Transport(msg) => write!(f, "shard unreachable: {msg}"),
        }
    }
}

/// The fan-out router for one shard layout.
pub struct ShardRouter {
    config: ShardConfig,
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
    default_endpoint: String,
}

impl ShardRouter {
    /// Build a router targeting `default_endpoint` (normally the local
    /// process) with optional per-gateway endpoint overrides.
    pub fn new(
        config: ShardConfig,
        default_endpoint: String,
        endpoints: HashMap<String, String>,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client, endpoints, default_endpoint }
    }

    /// The active shard layout.
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    fn endpoint_for(&self, gateway_id: &str) -> &str {
        self.endpoints
            .get(gateway_id)
            .map(String::as_str)
            .unwrap_or(&self.default_endpoint)
    }

    fn gateway_url(&self, gateway_id: &str, suffix: &str) -> String {
        format!(
            "{}/internal/gateway/{gateway_id}/{suffix}",
            self.endpoint_for(gateway_id).trim_end_matches('/')
        )
    }

    /// Partition a push across owning shards and post in parallel.
    ///
    /// Any shard failure surfaces verbatim. On success the ack reports
    /// the input batch size and the maximum server HLC observed, then a
    /// best-effort cross-shard broadcast is fired and forgotten.
    pub async fn sharded_push(&self, push: SyncPush) -> Result<PushAck, UpstreamError> {
        let input_len = push.deltas.len();
        let tables = extract_table_names(&push.deltas);
        debug!(
            owners = ?resolve_shard_gateway_ids(&self.config, &tables),
            deltas = input_len,
            "fanning push out"
        );
        let partitions = partition_deltas_by_shard(&self.config, push.deltas);
        let targets: Vec<(String, Vec<RowDelta>)> = partitions.into_iter().collect();

        let requests = targets.iter().map(|(gateway_id, deltas)| {
            let body = SyncPush {
                client_id: push.client_id.clone(),
                deltas: deltas.clone(),
                last_seen_hlc: push.last_seen_hlc,
            };
            let url = self.gateway_url(gateway_id, "push");
            async move {
                let response = self
                    .client
                    .post(&url)
                    .header(crate::api::headers::X_CLIENT_ID, body.client_id.as_str())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(UpstreamError::Status { status: status.as_u16(), body });
                }
                response
                    .json::<PushAck>()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))
            }
        });

        let mut max_hlc = Hlc::ZERO;
        for result in join_all(requests).await {
            let ack = result?;
            max_hlc = max_hlc.max(ack.server_hlc);
        }

        self.spawn_cross_shard_broadcast(targets, max_hlc, push.client_id.clone());

        Ok(PushAck { accepted: input_len, server_hlc: max_hlc })
    }

    /// Fire-and-forget: deltas ingested on one shard go to every other
    /// shard's broadcast route so their sockets hear about them.
    fn spawn_cross_shard_broadcast(
        &self,
        sources: Vec<(String, Vec<RowDelta>)>,
        server_hlc: Hlc,
        exclude_client_id: String,
    ) {
        let all_ids = self.config.all_gateway_ids();
        for (source_id, deltas) in sources {
            if deltas.is_empty() {
                continue;
            }
            for target_id in all_ids.iter().filter(|id| **id != source_id) {
                let url = self.gateway_url(target_id, "broadcast");
                let client = self.client.clone();
                let payload = BroadcastPayload {
                    deltas: deltas.clone(),
                    server_hlc,
                    exclude_client_id: Some(exclude_client_id.clone()),
                };
                tokio::spawn(async move {
                    if let Err(err) = client.post(&url).json(&payload).send().await {
                        debug!(%url, %err, "cross-shard broadcast dropped");
                    }
                });
            }
        }
    }

    /// Fan a pull out to every gateway and merge the survivors.
    ///
    /// The caller's verified identity travels as `X-Client-Id` and
    /// `X-Auth-Claims` so each shard can apply its own sync rules.
    /// Shards that error are logged and skipped; partial results beat
    /// total failure.
    pub async fn sharded_pull(
        &self,
        query: &str,
        client_id: &str,
        claims_json: &str,
    ) -> SyncResponse {
        let requests = self.config.all_gateway_ids().into_iter().map(|gateway_id| {
            let url = format!("{}?{query}", self.gateway_url(&gateway_id, "pull"));
            async move {
                let result = async {
                    let response = self
                        .client
                        .get(&url)
                        .header(crate::api::headers::X_CLIENT_ID, client_id)
                        .header(crate::api::headers::X_AUTH_CLAIMS, claims_json)
                        .send()
                        .await
                        .map_err(|e| e.to_string())?;
                    if !response.status().is_success() {
                        return Err(format!("status {}", response.status()));
                    }
                    response.json::<SyncResponse>().await.map_err(|e| e.to_string())
                }
                .await;
                (gateway_id, result)
            }
        });

        let mut responses = Vec::new();
        for (gateway_id, result) in join_all(requests).await {
            match result {
                Ok(response) => responses.push(response),
                Err(err) => warn!(gateway = %gateway_id, %err, "pull shard skipped"),
            }
        }
        crate::shard::config::merge_pull_responses(responses)
    }

    /// Replay an admin call on every gateway, all-or-nothing.
    pub async fn sharded_admin(
        &self,
        action: &str,
        body: Bytes,
    ) -> Result<AdminAck, UpstreamError> {
        let ids = self.config.all_gateway_ids();
        let requests = ids.iter().map(|gateway_id| {
            let url = self.gateway_url(gateway_id, &format!("admin/{action}"));
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .header("content-type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(UpstreamError::Status { status: status.as_u16(), body });
                }
                Ok(())
            }
        });

        for result in join_all(requests).await {
            result?;
        }
        Ok(AdminAck { applied: true, shards: ids.len() })
    }

    /// Merge every shard's checkpoint into one binary response.
    ///
    /// Individual shard errors are skipped. The snapshot HLC of the
    /// merged checkpoint is the maximum across the shards that answered.
    pub async fn sharded_checkpoint(&self) -> Result<(Bytes, Hlc), UpstreamError> {
        let requests = self.config.all_gateway_ids().into_iter().map(|gateway_id| {
            let url = self.gateway_url(&gateway_id, "checkpoint");
            async move {
                let result = async {
                    let response = self
                        .client
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| e.to_string())?;
                    if !response.status().is_success() {
                        return Err(format!("status {}", response.status()));
                    }
                    let hlc = response
                        .headers()
                        .get(X_CHECKPOINT_HLC)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Hlc::from_u64)
                        .unwrap_or(Hlc::ZERO);
                    let body = response.bytes().await.map_err(|e| e.to_string())?;
                    let decoded: SyncResponse = decode_body(&body).map_err(|e| e.to_string())?;
                    Ok::<_, String>((hlc, decoded))
                }
                .await;
                (gateway_id, result)
            }
        });

        let mut max_hlc = Hlc::ZERO;
        let mut deltas = Vec::new();
        let mut successes = 0usize;
        for (gateway_id, result) in join_all(requests).await {
            match result {
                Ok((hlc, response)) => {
                    successes += 1;
                    max_hlc = max_hlc.max(hlc);
                    deltas.extend(response.deltas);
                }
                Err(err) => warn!(gateway = %gateway_id, %err, "checkpoint shard skipped"),
            }
        }
        if successes == 0 {
            return Err(UpstreamError::Transport(
                "no shard produced a checkpoint".into(),
            ));
        }
        deltas.sort_by_key(|delta| delta.hlc);
        let body = encode_body(&SyncResponse { deltas, server_hlc: max_hlc, has_more: false })
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok((body, max_hlc))
    }
}

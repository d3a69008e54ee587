//! Checkpoint reading
//!
//! A checkpoint is a manifest plus binary `SyncResponse` chunks written
//! by the compaction side of the lake. The gateway only reads them: the
//! checkpoint endpoint streams the chunks back as one response so a
//! fresh client can bootstrap without replaying the full buffer.

use super::{checkpoint_chunk_key, checkpoint_manifest_key, ObjectStore};
use crate::clock::Hlc;
use crate::delta::codec::{decode_body, SyncResponse};
use crate::types::delta::RowDelta;
use crate::types::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Manifest describing a gateway's current checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointManifest {
    /// HLC of the snapshot the checkpoint was cut at
    pub snapshot_hlc: Hlc,
    /// Chunk object names under the gateway's checkpoint prefix
    pub chunks: Vec<String>,
    /// Number of chunks; must equal `chunks.len()`
    pub chunk_count: usize,
}

/// A fully loaded checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// HLC of the snapshot
    pub snapshot_hlc: Hlc,
    /// Deltas across all chunks, in manifest order
    pub deltas: Vec<RowDelta>,
}

/// Load a gateway's checkpoint from the object store.
///
/// A missing manifest surfaces as `NotFound`; a malformed manifest or
/// chunk is a protocol error since the writer owns that invariant.
pub async fn load_checkpoint(
    store: &dyn ObjectStore,
    gateway_id: &str,
) -> Result<Checkpoint> {
    let manifest_bytes = store
        .get_object(&checkpoint_manifest_key(gateway_id))
        .await
        .map_err(|e| {
            if e.is_not_found() {
                Error::not_found(format!("no checkpoint for gateway {gateway_id}"))
            } else {
                Error::Adapter(e)
            }
        })?;
    let manifest: CheckpointManifest = serde_json::from_slice(&manifest_bytes)?;
    if manifest.chunk_count != manifest.chunks.len() {
        return Err(Error::protocol(format!(
            "checkpoint manifest for {gateway_id} declares {} chunks but lists {}",
            manifest.chunk_count,
            manifest.chunks.len()
        )));
    }

    let mut deltas = Vec::new();
    for chunk_name in &manifest.chunks {
        let chunk = store
            .get_object(&checkpoint_chunk_key(gateway_id, chunk_name))
            .await
            .map_err(Error::Adapter)?;
        let response: SyncResponse = decode_body(&chunk)?;
        deltas.extend(response.deltas);
    }

    Ok(Checkpoint { snapshot_hlc: manifest.snapshot_hlc, deltas })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::codec::encode_body;
    use crate::storage::MemoryStore;
    use crate::types::delta::{ColumnDelta, DeltaOp};
    use serde_json::Value;

    fn delta(row: &str, hlc: u64) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            "t",
            row,
            "c",
            vec![ColumnDelta { column: "v".into(), value: Value::String(row.into()) }],
            Hlc::from_u64(hlc),
        )
    }

    async fn write_checkpoint(store: &MemoryStore, gateway_id: &str, chunks: Vec<Vec<RowDelta>>) {
        let names: Vec<String> = (0..chunks.len()).map(|i| format!("chunk-{i}.bin")).collect();
        let manifest = CheckpointManifest {
            snapshot_hlc: Hlc::from_u64(500),
            chunks: names.clone(),
            chunk_count: names.len(),
        };
        store
            .put_object(
                &checkpoint_manifest_key(gateway_id),
                serde_json::to_vec(&manifest).unwrap().into(),
                Some("application/json"),
            )
            .await
            .unwrap();
        for (name, deltas) in names.iter().zip(chunks) {
            let body = encode_body(&SyncResponse {
                deltas,
                server_hlc: Hlc::from_u64(500),
                has_more: false,
            })
            .unwrap();
            store
                .put_object(&checkpoint_chunk_key(gateway_id, name), body, None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_load_concatenates_chunks_in_order() {
        let store = MemoryStore::new();
        write_checkpoint(
            &store,
            "gw1",
            vec![vec![delta("r1", 10), delta("r2", 20)], vec![delta("r3", 30)]],
        )
        .await;
        let checkpoint = load_checkpoint(&store, "gw1").await.unwrap();
        assert_eq!(checkpoint.snapshot_hlc, Hlc::from_u64(500));
        let rows: Vec<&str> = checkpoint.deltas.iter().map(|d| d.row_id.as_str()).collect();
        assert_eq!(rows, vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let store = MemoryStore::new();
        let err = load_checkpoint(&store, "gw1").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_chunk_count_mismatch_rejected() {
        let store = MemoryStore::new();
        let manifest = CheckpointManifest {
            snapshot_hlc: Hlc::ZERO,
            chunks: vec!["a".into()],
            chunk_count: 2,
        };
        store
            .put_object(
                &checkpoint_manifest_key("gw1"),
                serde_json::to_vec(&manifest).unwrap().into(),
                None,
            )
            .await
            .unwrap();
        assert!(load_checkpoint(&store, "gw1").await.is_err());
    }
}

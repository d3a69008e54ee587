//! Object-store adapter surface and persisted key layout
//!
//! The lake itself is an external collaborator; the core only needs a
//! minimal put/get/head/list/delete surface. Two adapters ship with the
//! gateway: an in-memory store for tests and single-node development,
//! and a filesystem store for local durability. Everything the gateway
//! persists goes through this trait under a gateway-namespaced key.

use crate::types::error::AdapterError;
use async_trait::async_trait;
use bytes::Bytes;

/// Checkpoint manifest and chunk reading
pub mod checkpoint;

/// Self-describing columnar flush files
pub mod columnar;

/// Filesystem-backed adapter
pub mod fs;

/// JSON-lines flush files
pub mod jsonl;

/// In-memory adapter
pub mod memory;

pub use checkpoint::CheckpointManifest;
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Result type for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Metadata returned by a head request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Last modification time, milliseconds since the Unix epoch
    pub last_modified_ms: u64,
}

/// Minimal object-store surface consumed by the core.
///
/// `get`/`head` on a missing key fail with [`AdapterError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write an object, replacing any existing value.
    async fn put_object(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> AdapterResult<()>;

    /// Read an object in full.
    async fn get_object(&self, path: &str) -> AdapterResult<Bytes>;

    /// Metadata without the body.
    async fn head_object(&self, path: &str) -> AdapterResult<ObjectMeta>;

    /// Keys under a prefix, lexicographically sorted.
    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<String>>;

    /// Delete one object. Deleting a missing key is not an error.
    async fn delete_object(&self, path: &str) -> AdapterResult<()>;

    /// Delete several objects; stops at the first backend failure.
    async fn delete_objects(&self, paths: &[String]) -> AdapterResult<()> {
        for path in paths {
            self.delete_object(path).await?;
        }
        Ok(())
    }
}

/// Key of an immutable flush file.
pub fn flush_key(gateway_id: &str, snapshot_hlc: u64, file_id: &str, ext: &str) -> String {
    format!("flushes/{gateway_id}/{snapshot_hlc}-{file_id}.{ext}")
}

/// Key of a gateway's checkpoint manifest.
pub fn checkpoint_manifest_key(gateway_id: &str) -> String {
    format!("checkpoints/{gateway_id}/manifest.json")
}

/// Key of one checkpoint chunk.
pub fn checkpoint_chunk_key(gateway_id: &str, chunk_name: &str) -> String {
    format!("checkpoints/{gateway_id}/{chunk_name}")
}

/// Key of a durable per-gateway state value (`tableSchema`, `syncRules`).
pub fn gateway_state_key(gateway_id: &str, name: &str) -> String {
    format!("state/{gateway_id}/{name}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            flush_key("gw1", 42, "abcd", "jsonl"),
            "flushes/gw1/42-abcd.jsonl"
        );
        assert_eq!(checkpoint_manifest_key("gw1"), "checkpoints/gw1/manifest.json");
        assert_eq!(checkpoint_chunk_key("gw1", "chunk-0"), "checkpoints/gw1/chunk-0");
        assert_eq!(gateway_state_key("gw1", "syncRules"), "state/gw1/syncRules.json");
    }
}

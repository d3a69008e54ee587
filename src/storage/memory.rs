//! In-memory object store
//!
//! Backs tests and single-node development. Objects live in a
//! concurrent map; mutation timestamps come from the system clock.

use super::{AdapterResult, ObjectMeta, ObjectStore};
use crate::types::error::AdapterError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    last_modified_ms: u64,
}

/// Object store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        path: &str,
        bytes: Bytes,
        _content_type: Option<&str>,
    ) -> AdapterResult<()> {
        self.objects.insert(
            path.to_string(),
            StoredObject { bytes, last_modified_ms: Self::now_ms() },
        );
        Ok(())
    }

    async fn get_object(&self, path: &str) -> AdapterResult<Bytes> {
        self.objects
            .get(path)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| AdapterError::NotFound(path.to_string()))
    }

    async fn head_object(&self, path: &str) -> AdapterResult<ObjectMeta> {
        self.objects
            .get(path)
            .map(|entry| ObjectMeta {
                size: entry.bytes.len() as u64,
                last_modified_ms: entry.last_modified_ms,
            })
            .ok_or_else(|| AdapterError::NotFound(path.to_string()))
    }

    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete_object(&self, path: &str) -> AdapterResult<()> {
        self.objects.remove(path);
        Ok(())
    }
}

/// An adapter that fails every write; used to exercise flush recovery.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingStore;

#[cfg(test)]
#[async_trait]
impl ObjectStore for FailingStore {
    async fn put_object(&self, _: &str, _: Bytes, _: Option<&str>) -> AdapterResult<()> {
        Err(AdapterError::Backend("injected put failure".into()))
    }

    async fn get_object(&self, path: &str) -> AdapterResult<Bytes> {
        Err(AdapterError::NotFound(path.to_string()))
    }

    async fn head_object(&self, path: &str) -> AdapterResult<ObjectMeta> {
        Err(AdapterError::NotFound(path.to_string()))
    }

    async fn list_objects(&self, _: &str) -> AdapterResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_object(&self, _: &str) -> AdapterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_head_roundtrip() {
        let store = MemoryStore::new();
        store
            .put_object("flushes/gw/1-a.jsonl", Bytes::from_static(b"data"), None)
            .await
            .unwrap();
        let bytes = store.get_object("flushes/gw/1-a.jsonl").await.unwrap();
        assert_eq!(&bytes[..], b"data");
        let meta = store.head_object("flushes/gw/1-a.jsonl").await.unwrap();
        assert_eq!(meta.size, 4);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_object("absent").await.unwrap_err().is_not_found());
        assert!(store.head_object("absent").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        for key in ["flushes/gw/2-b.jsonl", "flushes/gw/1-a.jsonl", "state/gw/x.json"] {
            store.put_object(key, Bytes::new(), None).await.unwrap();
        }
        let keys = store.list_objects("flushes/gw/").await.unwrap();
        assert_eq!(keys, vec!["flushes/gw/1-a.jsonl", "flushes/gw/2-b.jsonl"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put_object("k", Bytes::new(), None).await.unwrap();
        store.delete_object("k").await.unwrap();
        store.delete_object("k").await.unwrap();
        assert!(store.is_empty());
    }
}

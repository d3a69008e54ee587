//! Filesystem-backed object store
//!
//! Maps object keys to paths under a root directory. Suitable for
//! single-node deployments where the "lake" is a local volume.

use super::{AdapterResult, ObjectMeta, ObjectStore};
use crate::types::error::AdapterError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`; the directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reject keys that would escape the root.
    fn resolve(&self, path: &str) -> AdapterResult<PathBuf> {
        if path.is_empty()
            || path.starts_with('/')
            || path.split('/').any(|part| part == ".." || part == "." || part.is_empty())
        {
            return Err(AdapterError::Backend(format!("invalid object key: {path:?}")));
        }
        Ok(self.root.join(path))
    }

    fn map_io(path: &str, err: std::io::Error) -> AdapterError {
        if err.kind() == ErrorKind::NotFound {
            AdapterError::NotFound(path.to_string())
        } else {
            AdapterError::Io(err)
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put_object(
        &self,
        path: &str,
        bytes: Bytes,
        _content_type: Option<&str>,
    ) -> AdapterResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AdapterError::Io)?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(AdapterError::Io)
    }

    async fn get_object(&self, path: &str) -> AdapterResult<Bytes> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map(Bytes::from)
            .map_err(|e| Self::map_io(path, e))
    }

    async fn head_object(&self, path: &str) -> AdapterResult<ObjectMeta> {
        let target = self.resolve(path)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        let last_modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(ObjectMeta { size: meta.len(), last_modified_ms })
    }

    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys).await?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete_object(&self, path: &str) -> AdapterResult<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::Io(e)),
        }
    }
}

/// Depth-first walk collecting keys relative to the root.
async fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> AdapterResult<()> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(AdapterError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(AdapterError::Io)? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(AdapterError::Io)?;
            if file_type.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                keys.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

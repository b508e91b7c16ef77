//! In-memory blobstore for tests and single-process development setups

use super::{BlobBody, Blobstore, GetResponse, PutResponse, Result, StoreError, StoreOp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Key → bytes table guarded by a single lock.
///
/// Stored content is immutable and shared, so readers holding a body are never
/// affected by a later `put` or `delete` of the same key.
#[derive(Default)]
pub struct MemoryBlobstore {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryBlobstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Copy of the bytes stored under `key`
    pub async fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).map(|data| data.to_vec())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Blobstore for MemoryBlobstore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        let data = self
            .entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))?;
        Ok(GetResponse::Inline(Box::pin(Cursor::new(data))))
    }

    async fn put(&self, key: &str, mut body: BlobBody) -> Result<PutResponse> {
        // Drain before taking the lock so a failing upload never replaces stored bytes
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|source| StoreError::Transient {
                op: StoreOp::Put,
                key: key.to_string(),
                source,
            })?;

        debug!("Stored blob {} ({} bytes) in memory", key, data.len());
        self.entries
            .write()
            .await
            .insert(key.to_string(), Arc::from(data));
        Ok(PutResponse::Stored)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn delete_dir(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.trim_end_matches('/');
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| {
            !(prefix.is_empty() || key == prefix || key.starts_with(&format!("{prefix}/")))
        });
        if entries.len() == before {
            return Err(StoreError::not_found(prefix));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(data: &'static [u8]) -> BlobBody {
        Box::pin(data)
    }

    async fn read_inline(store: &MemoryBlobstore, key: &str) -> Vec<u8> {
        match store.get(key).await.unwrap() {
            GetResponse::Inline(mut body) => {
                let mut data = Vec::new();
                body.read_to_end(&mut data).await.unwrap();
                data
            }
            GetResponse::Redirect(url) => panic!("unexpected redirect to {url}"),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlobstore::new();
        assert_eq!(store.put("abc", body(b"filename1 content")).await.unwrap(), PutResponse::Stored);

        assert!(store.exists("abc").await.unwrap());
        assert_eq!(read_inline(&store, "abc").await, b"filename1 content");
    }

    #[tokio::test]
    async fn test_repeated_put_keeps_content() {
        let store = MemoryBlobstore::new();
        store.put("abc", body(b"same bytes")).await.unwrap();
        store.put("abc", body(b"same bytes")).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(read_inline(&store, "abc").await, b"same bytes");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryBlobstore::new();
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.get("nope").await.unwrap_err().is_not_found());
        assert!(store.delete("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_dir_removes_prefix_only() {
        let store = MemoryBlobstore::new();
        store.put("cache/app-1/cflinuxfs4", body(b"a")).await.unwrap();
        store.put("cache/app-1/cflinuxfs3", body(b"b")).await.unwrap();
        store.put("cache/app-10/cflinuxfs4", body(b"c")).await.unwrap();

        store.delete_dir("cache/app-1").await.unwrap();

        assert_eq!(store.keys().await, vec!["cache/app-10/cflinuxfs4".to_string()]);
        assert!(store.delete_dir("cache/app-1").await.unwrap_err().is_not_found());
    }
}

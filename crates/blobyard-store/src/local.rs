//! Local filesystem backend (NVMe / mounted volume)

use super::{BlobBody, Blobstore, GetResponse, PutResponse, Result, StoreError, StoreOp};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stores each key as a file at `root/<key>`; keys are relative paths.
pub struct LocalBlobstore {
    root: PathBuf,
}

impl LocalBlobstore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::backend(StoreOp::Put, root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, op: StoreOp, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let valid = relative.components().next().is_some()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::backend(op, key, "key is not a relative path"));
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(op: StoreOp, key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::not_found(key)
    } else {
        StoreError::backend(op, key, err)
    }
}

#[async_trait]
impl Blobstore for LocalBlobstore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(StoreOp::Exists, key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::backend(StoreOp::Exists, key, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        let path = self.path_for(StoreOp::Get, key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| map_io(StoreOp::Get, key, e))?;
        Ok(GetResponse::Inline(Box::pin(file)))
    }

    async fn put(&self, key: &str, mut body: BlobBody) -> Result<PutResponse> {
        let path = self.path_for(StoreOp::Put, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::backend(StoreOp::Put, key, "key has no parent directory"))?;

        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::backend(StoreOp::Put, key, e))?;

        // Write atomically: stage next to the target, rename once complete
        let staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| StoreError::backend(StoreOp::Put, key, e))?;
        let (file, temp_path) = staged.into_parts();
        let mut file = fs::File::from_std(file);

        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|source| StoreError::Transient {
                op: StoreOp::Put,
                key: key.to_string(),
                source,
            })?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::backend(StoreOp::Put, key, e))?;
        file.shutdown()
            .await
            .map_err(|e| StoreError::backend(StoreOp::Put, key, e))?;
        drop(file);

        temp_path
            .persist(&path)
            .map_err(|e| StoreError::backend(StoreOp::Put, key, e.error))?;

        debug!("Stored blob {} ({} bytes) to local", key, written);
        Ok(PutResponse::Stored)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(StoreOp::Delete, key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| map_io(StoreOp::Delete, key, e))
    }

    async fn delete_dir(&self, prefix: &str) -> Result<()> {
        let path = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.path_for(StoreOp::DeleteDir, prefix)?
        };
        fs::remove_dir_all(&path)
            .await
            .map_err(|e| map_io(StoreOp::DeleteDir, prefix, e))?;
        if path == self.root {
            fs::create_dir_all(&self.root)
                .await
                .map_err(|e| StoreError::backend(StoreOp::DeleteDir, prefix, e))?;
        }
        Ok(())
    }
}

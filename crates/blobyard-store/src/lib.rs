//! Blob store contract shared by every storage backend
//!
//! Packages, buildpacks, droplets, buildpack caches and app-stash entries all
//! live behind the same [`Blobstore`] interface. Backends either proxy bytes
//! through the service ([`GetResponse::Inline`]) or hand back a location the
//! caller should use directly ([`GetResponse::Redirect`]).
//!
//! Backends shipped here:
//! - [`MemoryBlobstore`]: process-local map, used for tests and development
//! - [`LocalBlobstore`]: files under a root directory (NVMe / mounted volume)

mod local;
mod memory;

pub use local::LocalBlobstore;
pub use memory::MemoryBlobstore;

use async_trait::async_trait;
use std::fmt::{self, Display};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Readable blob content. Dropping it releases the underlying handle.
pub type BlobBody = Pin<Box<dyn AsyncRead + Send>>;

/// Result of [`Blobstore::get`]
pub enum GetResponse {
    /// Bytes proxied through this process
    Inline(BlobBody),
    /// Fetch the blob directly from this URL
    Redirect(String),
}

impl fmt::Debug for GetResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetResponse::Inline(_) => f.write_str("Inline(..)"),
            GetResponse::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
        }
    }
}

/// Result of [`Blobstore::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResponse {
    Stored,
    /// Upload the blob directly to this URL
    Redirect(String),
}

/// Storage operation, carried by errors for diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Exists,
    Get,
    Put,
    Delete,
    DeleteDir,
}

impl Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreOp::Exists => "exists",
            StoreOp::Get => "get",
            StoreOp::Put => "put",
            StoreOp::Delete => "delete",
            StoreOp::DeleteDir => "delete_dir",
        })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("Transient I/O failure during {op} of {key}: {source}")]
    Transient {
        op: StoreOp,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend failed during {op} of {key}: {message}")]
    Backend {
        op: StoreOp,
        key: String,
        message: String,
    },

    #[error("Operation {op} is not supported by this blobstore")]
    Unsupported { op: StoreOp },
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    pub fn backend(op: StoreOp, key: impl Into<String>, message: impl Display) -> Self {
        StoreError::Backend {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether a fresh attempt of the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Backend { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage backend trait for different storage implementations.
///
/// Implementations must be safe under arbitrary concurrent calls. `put` is
/// idempotent per key, and `get`/`delete` of an absent key return
/// [`StoreError::NotFound`] rather than a transport error.
#[async_trait]
pub trait Blobstore: Send + Sync {
    /// Check if a blob exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Open a blob for reading, or redirect the caller elsewhere
    async fn get(&self, key: &str) -> Result<GetResponse>;

    /// Store the full content of `body` under `key`
    async fn put(&self, key: &str, body: BlobBody) -> Result<PutResponse>;

    /// Delete a single blob
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every blob under a key prefix
    async fn delete_dir(&self, _prefix: &str) -> Result<()> {
        Err(StoreError::Unsupported {
            op: StoreOp::DeleteDir,
        })
    }
}

/// Partitioned key for resources addressed by guid: `ab/cd/abcd...`
pub fn partitioned_key(guid: &str) -> Option<String> {
    if !guid.is_ascii() || guid.contains('/') || guid.contains("..") {
        return None;
    }
    let prefix = guid.get(0..4)?;
    Some(format!("{}/{}/{}", &prefix[0..2], &prefix[2..4], guid))
}

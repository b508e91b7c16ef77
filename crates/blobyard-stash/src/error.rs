use blobyard_common::{Digest, ParseError};
use blobyard_store::StoreError;
use thiserror::Error;
use zip::result::ZipError;

use crate::retry::Retryable;

#[derive(Error, Debug)]
pub enum StashError {
    #[error("Malformed archive: {0}")]
    MalformedArchive(#[source] ZipError),

    #[error("Invalid archive entry: {0}")]
    InvalidEntry(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Blob {digest} for {name} is not in the blobstore")]
    MissingBlob { digest: Digest, name: String },

    #[error("Fetching blob {digest} for {name} failed after {attempts} attempts: {source}")]
    FetchExhausted {
        digest: Digest,
        name: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("Blobstore redirected {digest} to {location}, but the app stash needs inline content")]
    UnexpectedRedirect { digest: Digest, location: String },

    #[error("Failed to write bundle archive: {0}")]
    ArchiveWrite(#[source] ZipError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Bundle assembly was cancelled")]
    Cancelled,
}

impl StashError {
    /// Errors caused by the request content rather than by this service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StashError::MalformedArchive(_) | StashError::InvalidEntry(_)
        )
    }
}

/// Failure of a single attempt to fetch one blob into a spool file
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Reading blob body failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Writing spool file failed: {0}")]
    Spool(#[source] std::io::Error),

    #[error("Redirected to {0}")]
    Redirect(String),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Store(e) => e.is_retryable(),
            FetchError::Read(_) => true,
            FetchError::Spool(_) | FetchError::Redirect(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StashError>;

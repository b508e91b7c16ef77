//! App stash: content-addressed dedup for application pushes
//!
//! A push goes through three steps, all driven by [`Stash`]:
//! 1. [`Stash::ingest`] stores every file of an uploaded archive under its digest
//! 2. [`Stash::missing`] tells the client which digests it still has to upload
//! 3. [`Stash::assemble`] rebuilds the full application archive from fingerprints
//!
//! The stash holds no state of its own; everything lives in the [`Blobstore`].

pub mod assembler;
mod cancel;
mod config;
mod error;
mod ingest;
mod matcher;
pub mod retry;

pub use assembler::{AssembledArchive, BundleRequest, SourceArchive};
pub use cancel::CancelSignal;
pub use config::StashConfig;
pub use error::{FetchError, Result, StashError};
pub use ingest::{IngestReport, IngestedEntry};
pub use retry::{RetryError, RetryPolicy, Retryable};

use std::sync::Arc;

use blobyard_store::Blobstore;

#[derive(Clone)]
pub struct Stash {
    store: Arc<dyn Blobstore>,
    config: StashConfig,
}

impl Stash {
    pub fn new(store: Arc<dyn Blobstore>, config: StashConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn Blobstore> {
        &self.store
    }

    pub fn config(&self) -> &StashConfig {
        &self.config
    }
}

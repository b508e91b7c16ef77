//! HTTP surface of blobyard: the app stash plus package, buildpack, droplet and
//! buildpack cache storage.

pub mod app_stash;
pub mod config;
pub mod error;
pub mod resources;
pub mod streaming;
pub mod upload;


use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::post, Router};
use blobyard_stash::{CancelSignal, Stash};
use blobyard_store::{Blobstore, LocalBlobstore, MemoryBlobstore, StoreError};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{ServerConfig, StoreKind};

/// One blobstore per namespace
#[derive(Clone)]
pub struct Blobstores {
    pub app_stash: Arc<dyn Blobstore>,
    pub packages: Arc<dyn Blobstore>,
    pub buildpacks: Arc<dyn Blobstore>,
    pub droplets: Arc<dyn Blobstore>,
    pub buildpack_cache: Arc<dyn Blobstore>,
}

impl Blobstores {
    pub fn in_memory() -> Self {
        Self {
            app_stash: Arc::new(MemoryBlobstore::new()),
            packages: Arc::new(MemoryBlobstore::new()),
            buildpacks: Arc::new(MemoryBlobstore::new()),
            droplets: Arc::new(MemoryBlobstore::new()),
            buildpack_cache: Arc::new(MemoryBlobstore::new()),
        }
    }

    /// Each namespace in its own directory below `root`
    pub async fn local(root: PathBuf) -> Result<Self, StoreError> {
        Ok(Self {
            app_stash: Arc::new(LocalBlobstore::new(root.join("app_stash")).await?),
            packages: Arc::new(LocalBlobstore::new(root.join("packages")).await?),
            buildpacks: Arc::new(LocalBlobstore::new(root.join("buildpacks")).await?),
            droplets: Arc::new(LocalBlobstore::new(root.join("droplets")).await?),
            buildpack_cache: Arc::new(LocalBlobstore::new(root.join("buildpack_cache")).await?),
        })
    }

    pub async fn from_config(config: &ServerConfig) -> Result<Self, StoreError> {
        match config.store {
            StoreKind::Memory => {
                info!("Using in-memory blobstores");
                Ok(Self::in_memory())
            }
            StoreKind::Local => {
                info!("Using local blobstores under {}", config.store_root.display());
                Self::local(config.store_root.clone()).await
            }
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub stash: Stash,
    pub stores: Blobstores,
    /// Cancelled on shutdown so in-flight bundle assembly stops early
    pub shutdown: CancelSignal,
}

impl AppState {
    pub fn new(config: ServerConfig, stores: Blobstores) -> Self {
        let stash = Stash::new(stores.app_stash.clone(), config.stash.clone());
        Self {
            config,
            stash,
            stores,
            shutdown: CancelSignal::new(),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.config.stash.temp_dir()
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/app_stash/entries", post(app_stash::create_entries))
        .route("/app_stash/matches", post(app_stash::find_matches))
        .route("/app_stash/bundles", post(app_stash::create_bundle))
        .merge(resources::resource_routes())
        .merge(resources::buildpack_cache_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Package, buildpack, droplet and buildpack cache endpoints
//!
//! Each resource kind lives in its own blobstore. Packages, buildpacks and
//! droplets are addressed by guid under a two-level partitioned key; buildpack
//! caches by application guid and stack name.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, put},
    Extension, Router,
};
use blobyard_store::{partitioned_key, BlobBody, Blobstore, GetResponse, PutResponse};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::streaming::reader_body;
use crate::upload::spool_named_field;
use crate::AppState;

const BUILDPACK_CACHE_FIELD: &str = "buildpack_cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Package,
    Buildpack,
    Droplet,
}

impl ResourceKind {
    /// Multipart field carrying the upload
    pub fn form_field(self) -> &'static str {
        match self {
            ResourceKind::Package => "package",
            ResourceKind::Buildpack => "buildpack",
            ResourceKind::Droplet => "droplet",
        }
    }

    fn collection(self) -> &'static str {
        match self {
            ResourceKind::Package => "packages",
            ResourceKind::Buildpack => "buildpacks",
            ResourceKind::Droplet => "droplets",
        }
    }

    fn store(self, state: &AppState) -> &Arc<dyn Blobstore> {
        match self {
            ResourceKind::Package => &state.stores.packages,
            ResourceKind::Buildpack => &state.stores.buildpacks,
            ResourceKind::Droplet => &state.stores.droplets,
        }
    }
}

pub fn resource_routes() -> Router<Arc<AppState>> {
    [
        ResourceKind::Package,
        ResourceKind::Buildpack,
        ResourceKind::Droplet,
    ]
    .into_iter()
    .fold(Router::new(), |router, kind| {
        router.merge(
            Router::new()
                .route(
                    &format!("/{}/:guid", kind.collection()),
                    put(put_resource).get(get_resource).delete(delete_resource),
                )
                .layer(Extension(kind)),
        )
    })
}

pub fn buildpack_cache_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/buildpack_cache/entries/:app_guid/:stack_name",
            put(put_buildpack_cache)
                .get(get_buildpack_cache)
                .delete(delete_buildpack_cache),
        )
        .route(
            "/buildpack_cache/entries/:app_guid",
            delete(delete_app_buildpack_caches),
        )
        .route("/buildpack_cache/entries", delete(delete_all_buildpack_caches))
}

#[instrument(skip(state, multipart))]
pub async fn put_resource(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(guid): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let key = resource_key(&guid)?;
    let upload = spool_named_field(&mut multipart, kind.form_field(), &state.temp_dir())
        .await?
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Could not retrieve '{}' form parameter",
                kind.form_field()
            ))
        })?;

    store_upload(kind.store(&state).as_ref(), &key, &upload).await
}

#[instrument(skip(state))]
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(guid): Path<String>,
) -> Result<Response, AppError> {
    let key = resource_key(&guid)?;
    serve_blob(kind.store(&state).as_ref(), &key).await
}

#[instrument(skip(state))]
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(guid): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = resource_key(&guid)?;
    kind.store(&state).delete(&key).await?;
    info!("Deleted {} {}", kind.form_field(), guid);
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, multipart))]
pub async fn put_buildpack_cache(
    State(state): State<Arc<AppState>>,
    Path((app_guid, stack_name)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let key = cache_key(&app_guid, Some(&stack_name))?;
    let upload = spool_named_field(&mut multipart, BUILDPACK_CACHE_FIELD, &state.temp_dir())
        .await?
        .ok_or_else(|| {
            AppError::BadRequest("Could not retrieve 'buildpack_cache' form parameter".to_string())
        })?;

    store_upload(state.stores.buildpack_cache.as_ref(), &key, &upload).await
}

#[instrument(skip(state))]
pub async fn get_buildpack_cache(
    State(state): State<Arc<AppState>>,
    Path((app_guid, stack_name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let key = cache_key(&app_guid, Some(&stack_name))?;
    serve_blob(state.stores.buildpack_cache.as_ref(), &key).await
}

#[instrument(skip(state))]
pub async fn delete_buildpack_cache(
    State(state): State<Arc<AppState>>,
    Path((app_guid, stack_name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let key = cache_key(&app_guid, Some(&stack_name))?;
    state.stores.buildpack_cache.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_app_buildpack_caches(
    State(state): State<Arc<AppState>>,
    Path(app_guid): Path<String>,
) -> Result<StatusCode, AppError> {
    let prefix = cache_key(&app_guid, None)?;
    state.stores.buildpack_cache.delete_dir(&prefix).await?;
    info!("Deleted buildpack caches of app {}", app_guid);
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_all_buildpack_caches(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    state.stores.buildpack_cache.delete_dir("entries").await?;
    info!("Deleted all buildpack caches");
    Ok(StatusCode::NO_CONTENT)
}

fn resource_key(guid: &str) -> Result<String, AppError> {
    partitioned_key(guid).ok_or_else(|| AppError::BadRequest(format!("Invalid guid '{}'", guid)))
}

fn cache_key(app_guid: &str, stack_name: Option<&str>) -> Result<String, AppError> {
    let mut key = format!("entries/{}", path_segment(app_guid)?);
    if let Some(stack) = stack_name {
        key.push('/');
        key.push_str(path_segment(stack)?);
    }
    Ok(key)
}

fn path_segment(value: &str) -> Result<&str, AppError> {
    let invalid = value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']);
    if invalid {
        return Err(AppError::BadRequest(format!("Invalid path segment '{}'", value)));
    }
    Ok(value)
}

/// Put a spooled upload, answering 201 or redirecting the client to the store
async fn store_upload(
    store: &dyn Blobstore,
    key: &str,
    upload: &std::path::Path,
) -> Result<Response, AppError> {
    let body: BlobBody = Box::pin(tokio::fs::File::open(upload).await?);
    match store.put(key, body).await? {
        PutResponse::Stored => Ok(StatusCode::CREATED.into_response()),
        PutResponse::Redirect(location) => Ok(redirect(location)),
    }
}

async fn serve_blob(store: &dyn Blobstore, key: &str) -> Result<Response, AppError> {
    match store.get(key).await? {
        GetResponse::Inline(body) => Ok((StatusCode::OK, reader_body(body, ())).into_response()),
        GetResponse::Redirect(location) => Ok(redirect(location)),
    }
}

fn redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

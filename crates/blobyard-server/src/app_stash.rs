//! App stash endpoints: entries, matches and bundles

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use blobyard_common::{DigestEntry, Fingerprint};
use blobyard_stash::BundleRequest;
use tempfile::TempPath;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::streaming::reader_body;
use crate::upload::{spool_field, spool_named_field};
use crate::AppState;

const APPLICATION_FIELD: &str = "application";
const RESOURCES_FIELD: &str = "resources";

/// Store every file of the uploaded `application` zip by content digest
#[instrument(skip_all)]
pub async fn create_entries(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let upload = spool_named_field(&mut multipart, APPLICATION_FIELD, &state.temp_dir())
        .await?
        .ok_or_else(|| {
            AppError::BadRequest("Could not retrieve 'application' form parameter".to_string())
        })?;

    let report = state.stash.ingest(&upload).await?;
    info!(
        files = report.entries.len(),
        stored = report.stored,
        "Stored application entries"
    );
    Ok(StatusCode::OK)
}

/// Report which of the posted digests are not stored yet
#[instrument(skip_all)]
pub async fn find_matches(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Vec<DigestEntry>>, AppError> {
    let entries: Vec<DigestEntry> = parse_json(&body)?;
    let missing = state
        .stash
        .missing(entries.into_iter().map(|entry| entry.sha1).collect())
        .await?;

    Ok(Json(missing.into_iter().map(DigestEntry::from).collect()))
}

/// Assemble a zip from fingerprints.
///
/// Accepts either a JSON fingerprint array, or a multipart form with a
/// `resources` field holding that array and an optional `application` zip
/// whose files are merged into the bundle.
#[instrument(skip_all)]
pub async fn create_bundle(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let (fingerprints, upload) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_bundle_form(multipart, &state).await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        (parse_json(&body)?, None)
    };

    let mut bundle = BundleRequest::new(fingerprints);
    if let Some(upload) = &upload {
        bundle = bundle.with_source_archive(
            upload.to_path_buf(),
            state.config.minimum_size,
            state.config.maximum_size,
        );
    }

    let archive = state.stash.assemble(bundle, &state.shutdown).await?;
    drop(upload);

    let size = archive.size();
    let file = archive.open().await?;
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (header::CONTENT_LENGTH, HeaderValue::from(size)),
    ];
    Ok((headers, reader_body(file, archive)).into_response())
}

async fn read_bundle_form(
    mut multipart: Multipart,
    state: &AppState,
) -> Result<(Vec<Fingerprint>, Option<TempPath>), AppError> {
    let mut fingerprints = None;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some(RESOURCES_FIELD) => {
                let body = field.bytes().await?;
                fingerprints = Some(parse_json(&body)?);
            }
            Some(APPLICATION_FIELD) => {
                upload = Some(spool_field(field, &state.temp_dir()).await?);
            }
            _ => {}
        }
    }

    let fingerprints = fingerprints.ok_or_else(|| {
        AppError::BadRequest("Could not retrieve 'resources' form parameter".to_string())
    })?;
    Ok((fingerprints, upload))
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::Unprocessable(format!("Invalid body: {}", e)))
}

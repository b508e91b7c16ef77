//! Multipart uploads spooled to temporary files

use std::path::Path;

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::AppError;

/// Copy one multipart field to a temporary file in `dir`.
/// The file is deleted when the returned path is dropped.
pub async fn spool_field(mut field: Field<'_>, dir: &Path) -> Result<TempPath, AppError> {
    let (file, path) = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut received = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(field = ?field.name(), bytes = received, "Spooled upload");
    Ok(path)
}

/// Spool the first field called `name`, ignoring any other fields
pub async fn spool_named_field(
    multipart: &mut Multipart,
    name: &str,
    dir: &Path,
) -> Result<Option<TempPath>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(name) {
            return spool_field(field, dir).await.map(Some);
        }
    }
    Ok(None)
}

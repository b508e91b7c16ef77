use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use blobyard_stash::StashError;
use blobyard_store::StoreError;
use tracing::error;

/// Error type for HTTP handlers, rendered as `{"error": message}`
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unprocessable(String),
    NotFound(String),
    NotImplemented(String),
    Unavailable(String),
    Internal(String),
}

impl From<StashError> for AppError {
    fn from(err: StashError) -> Self {
        match err {
            e if e.is_client_error() => AppError::BadRequest(e.to_string()),
            StashError::Cancelled => AppError::Unavailable("Server is shutting down".to_string()),
            e => {
                error!(error = %e, "App stash request failed");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => AppError::NotFound(key),
            e @ StoreError::Unsupported { .. } => AppError::NotImplemented(e.to_string()),
            e => {
                error!(error = %e, "Blobstore request failed");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        error!(error = %err, "I/O failure while handling request");
        AppError::Internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::NotFound(key) => (StatusCode::NOT_FOUND, format!("Blob not found: {}", key)),
            AppError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

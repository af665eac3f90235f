use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::error::StorageError;

/// Non-standard status the tus checksum extension uses for digest
/// mismatches.
const CHECKSUM_MISMATCH_STATUS: u16 = 460;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Precondition Failed: {0}")]
    PreconditionFailed(String),

    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_slug(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Storage(e) => match e {
                StorageError::NotFound => (StatusCode::NOT_FOUND, "not-found"),
                StorageError::OffsetMismatch { .. } => (StatusCode::CONFLICT, "offset-mismatch"),
                StorageError::AlreadyCompleted => (StatusCode::CONFLICT, "upload-complete"),
                StorageError::SizeExceeded { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "entity-too-large")
                }
                StorageError::Locked => (StatusCode::LOCKED, "upload-locked"),
                StorageError::ChecksumMismatch => (
                    StatusCode::from_u16(CHECKSUM_MISMATCH_STATUS)
                        .unwrap_or(StatusCode::BAD_REQUEST),
                    "checksum-mismatch",
                ),
                StorageError::Validation(_) => (StatusCode::BAD_REQUEST, "validation-failed"),
                StorageError::Backend(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "backend-unavailable")
                }
            },
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad-request"),
            AppError::PreconditionFailed(_) => {
                (StatusCode::PRECONDITION_FAILED, "precondition-failed")
            }
            AppError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported-media-type")
            }
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "entity-too-large"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, slug) = self.status_and_slug();

        // Offset conflicts and lock contention are expected client
        // conditions, not server errors.
        match &self {
            AppError::Storage(e) if e.is_client_retryable() => {
                tracing::debug!("{}", e);
            }
            AppError::Storage(StorageError::Backend(e)) => {
                tracing::error!("Backend error: {:?}", e);
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
            }
            _ => {}
        }

        let detail = match &self {
            AppError::Storage(StorageError::Backend(_)) | AppError::Internal(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "type": format!("https://upload-server.dev/errors/{slug}"),
            "title": slug,
            "status": status.as_u16(),
            "detail": detail,
        }));

        (status, [("Tus-Resumable", "1.0.0")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StorageError::NotFound, 404),
            (
                StorageError::OffsetMismatch {
                    expected: 1,
                    got: 2,
                },
                409,
            ),
            (StorageError::AlreadyCompleted, 409),
            (StorageError::SizeExceeded { limit: 1 }, 413),
            (StorageError::Locked, 423),
            (StorageError::ChecksumMismatch, 460),
            (StorageError::Validation("x".to_string()), 400),
        ];
        for (err, expected) in cases {
            let (status, _) = AppError::from(err).status_and_slug();
            assert_eq!(status.as_u16(), expected);
        }
    }
}

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::AppState;
use crate::api::error::AppError;
use crate::models::NewUpload;
use crate::utils::checksum::{Checksum, SUPPORTED_ALGORITHMS};
use crate::utils::metadata::{encode_upload_metadata, parse_upload_metadata};

pub const TUS_VERSION: &str = "1.0.0";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Result<Option<u64>, AppError> {
    match header_str(headers, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("invalid {name} header: '{raw}'"))),
    }
}

/// Clients SHOULD send `Tus-Resumable`; when they do, only protocol
/// version 1.0.0 is accepted.
fn check_tus_version(headers: &HeaderMap) -> Result<(), AppError> {
    match header_str(headers, "Tus-Resumable") {
        Some(version) if version != TUS_VERSION => Err(AppError::PreconditionFailed(format!(
            "unsupported tus version '{version}', server speaks {TUS_VERSION}"
        ))),
        _ => Ok(()),
    }
}

/// POST /files - create a new upload resource.
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;

    let size = header_u64(&headers, "Upload-Length")?;
    let defer_length = header_str(&headers, "Upload-Defer-Length") == Some("1");
    if size.is_none() && !defer_length {
        return Err(AppError::BadRequest(
            "either Upload-Length or Upload-Defer-Length: 1 is required".to_string(),
        ));
    }
    if size.is_some() && defer_length {
        return Err(AppError::BadRequest(
            "Upload-Length and Upload-Defer-Length are mutually exclusive".to_string(),
        ));
    }

    let metadata = match header_str(&headers, "Upload-Metadata") {
        Some(raw) => parse_upload_metadata(raw)
            .map_err(|e| AppError::BadRequest(format!("invalid Upload-Metadata: {e}")))?,
        None => Default::default(),
    };
    let original_name = metadata.get("filename").cloned();

    let record = state
        .uploads
        .create(NewUpload {
            id: None,
            original_name,
            size,
            metadata,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        [
            ("Location", format!("/files/{}", record.id)),
            ("Tus-Resumable", TUS_VERSION.to_string()),
        ],
    )
        .into_response())
}

/// HEAD /files/:id - current offset and length, no body. Never takes the
/// upload lock, so it can race with an in-flight append and still only
/// ever observes the last committed offset.
pub async fn head_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;

    let record = state.uploads.info(&id).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_VERSION));
    response_headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    response_headers.insert("Upload-Offset", HeaderValue::from(record.bytes_written));
    match record.size {
        Some(size) => {
            response_headers.insert("Upload-Length", HeaderValue::from(size));
        }
        None => {
            response_headers.insert("Upload-Defer-Length", HeaderValue::from_static("1"));
        }
    }
    if !record.metadata.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&encode_upload_metadata(&record.metadata)) {
            response_headers.insert("Upload-Metadata", value);
        }
    }

    Ok((StatusCode::OK, response_headers).into_response())
}

/// PATCH /files/:id - append one chunk at the declared offset.
pub async fn patch_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;

    match header_str(&headers, "content-type") {
        Some("application/offset+octet-stream") => {}
        other => {
            return Err(AppError::UnsupportedMediaType(format!(
                "PATCH requires application/offset+octet-stream, got '{}'",
                other.unwrap_or("")
            )));
        }
    }

    let offset = header_u64(&headers, "Upload-Offset")?
        .ok_or_else(|| AppError::BadRequest("Upload-Offset header is required".to_string()))?;

    // A deferred-length upload resolves its size on the PATCH that
    // carries Upload-Length.
    let declared_size = header_u64(&headers, "Upload-Length")?;

    let checksum = match header_str(&headers, "Upload-Checksum") {
        Some(raw) => Some(
            Checksum::parse_header(raw)
                .map_err(|e| AppError::BadRequest(format!("invalid Upload-Checksum: {e}")))?,
        ),
        None => None,
    };

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let reader = StreamReader::new(stream);

    let record = state
        .uploads
        .append(&id, offset, Box::new(reader), checksum, declared_size)
        .await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            ("Tus-Resumable", TUS_VERSION.to_string()),
            ("Upload-Offset", record.bytes_written.to_string()),
        ],
    )
        .into_response())
}

/// DELETE /files/:id - terminate an upload. Idempotent.
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;
    state.uploads.terminate(&id).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [("Tus-Resumable", TUS_VERSION.to_string())],
    )
        .into_response())
}

/// OPTIONS /files - capability discovery.
pub async fn options_files(State(state): State<AppState>) -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            ("Tus-Resumable", TUS_VERSION.to_string()),
            ("Tus-Version", TUS_VERSION.to_string()),
            ("Tus-Max-Size", state.config.max_upload_size.to_string()),
            (
                "Tus-Extension",
                "creation,termination,expiration,checksum".to_string(),
            ),
            ("Tus-Checksum-Algorithm", SUPPORTED_ALGORITHMS.to_string()),
        ],
    )
        .into_response()
}

use std::collections::BTreeMap;

use axum::{Json, extract::Multipart, extract::State};
use futures::TryStreamExt;
use serde_json::{Value, json};
use tokio_util::io::StreamReader;

use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FileRecord, NewUpload};

/// POST /upload - classic single-request ingestion of a
/// `multipart/form-data` body. The file field is piped straight into the
/// backend as it arrives off the wire; backpressure is the transport's
/// flow control, and since there is no resumption there is no locking.
pub async fn ingest_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut stored: Option<FileRecord> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("length limit exceeded") {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" {
            continue;
        }

        let original_name = field.file_name().map(|s| s.to_string());
        let mut metadata = BTreeMap::new();
        if let Some(filename) = &original_name {
            metadata.insert("filename".to_string(), filename.clone());
        }
        if let Some(content_type) = field.content_type() {
            metadata.insert("content_type".to_string(), content_type.to_string());
        }

        // Length is unknown until the stream is drained, so the record is
        // created with a deferred size and finalized from the byte count.
        let record = state
            .uploads
            .create(NewUpload {
                id: None,
                original_name,
                size: None,
                metadata,
            })
            .await?;

        let body_with_io_error = field.map_err(std::io::Error::other);
        let reader = StreamReader::new(body_with_io_error);

        let written = match state.backend.write(&record.id, 0, Box::new(reader), None).await {
            Ok(record) => record,
            Err(e) => {
                // Half-written single-shot uploads are useless; clean up
                // rather than leaving them for the janitor.
                let _ = state.backend.delete(&record.id).await;
                return Err(e.into());
            }
        };

        let finalized = state
            .backend
            .declare_size(&record.id, written.bytes_written)
            .await?;
        stored = Some(finalized);
    }

    let record = stored.ok_or(AppError::BadRequest("No file provided".to_string()))?;

    let mut value = serde_json::to_value(&record).map_err(anyhow::Error::new)?;
    value["status"] = json!(record.status());
    Ok(Json(value))
}

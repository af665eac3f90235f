use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived lifecycle state of an upload. Never stored; always computed
/// from `bytes_written` and `size`. `Expired` is only ever observed by the
/// janitor when it compares `created_at` against the configured max age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Created,
    Part,
    Completed,
    Expired,
}

/// One committed part of a cloud multipart upload. Part numbers are
/// 1-based and strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub etag: String,
}

/// Checksum recorded after a verified append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub algorithm: String,
    /// Hex-encoded digest.
    pub digest: String,
}

/// Parameters for creating a new upload. `size: None` defers the length
/// until a later request declares it.
#[derive(Debug, Clone, Default)]
pub struct NewUpload {
    pub id: Option<String>,
    pub original_name: Option<String>,
    pub size: Option<u64>,
    pub metadata: BTreeMap<String, String>,
}

/// The persistent record describing one upload. Backends own its
/// durability: the disk backend keeps it in a JSON sidecar file, the S3
/// backend in a `{id}.info` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub original_name: Option<String>,
    /// Declared total size in bytes. `None` while the length is deferred.
    pub size: Option<u64>,
    /// Count of durably committed bytes. Monotonically non-decreasing.
    pub bytes_written: u64,
    /// Immutable after creation.
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<ChecksumInfo>,
    /// Provider-native multipart upload id (S3 backend only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub upload_id: Option<String>,
    /// Committed multipart parts, ordered by part number (S3 backend only).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parts: Vec<CompletedPartInfo>,
    /// Provider object key the finished upload lives under.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub storage_key: Option<String>,
}

impl FileRecord {
    pub fn new(new: NewUpload) -> Self {
        Self {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            original_name: new.original_name,
            size: new.size,
            bytes_written: 0,
            metadata: new.metadata,
            created_at: Utc::now(),
            checksum: None,
            upload_id: None,
            parts: Vec::new(),
            storage_key: None,
        }
    }

    pub fn status(&self) -> UploadStatus {
        if let Some(total) = self.size {
            if self.bytes_written == total {
                return UploadStatus::Completed;
            }
        }
        if self.bytes_written == 0 {
            UploadStatus::Created
        } else {
            UploadStatus::Part
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == UploadStatus::Completed
    }

    /// Age relative to creation, as seen at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: Option<u64>, bytes_written: u64) -> FileRecord {
        let mut r = FileRecord::new(NewUpload {
            size,
            ..Default::default()
        });
        r.bytes_written = bytes_written;
        r
    }

    #[test]
    fn test_status_transitions() {
        assert_eq!(record(Some(100), 0).status(), UploadStatus::Created);
        assert_eq!(record(Some(100), 50).status(), UploadStatus::Part);
        assert_eq!(record(Some(100), 100).status(), UploadStatus::Completed);
        assert_eq!(record(Some(0), 0).status(), UploadStatus::Completed);
        // Deferred length can never be complete.
        assert_eq!(record(None, 100).status(), UploadStatus::Part);
    }

    #[test]
    fn test_new_assigns_id() {
        let a = FileRecord::new(NewUpload::default());
        let b = FileRecord::new(NewUpload::default());
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);

        let c = FileRecord::new(NewUpload {
            id: Some("custom-id".to_string()),
            ..Default::default()
        });
        assert_eq!(c.id, "custom-id");
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), "report.pdf".to_string());
        let mut r = FileRecord::new(NewUpload {
            original_name: Some("report.pdf".to_string()),
            size: Some(42),
            metadata,
            ..Default::default()
        });
        r.upload_id = Some("provider-upload-id".to_string());
        r.parts.push(CompletedPartInfo {
            part_number: 1,
            etag: "\"abc\"".to_string(),
        });

        let json = serde_json::to_string(&r).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.size, Some(42));
        assert_eq!(back.metadata, r.metadata);
        assert_eq!(back.parts, r.parts);
    }
}

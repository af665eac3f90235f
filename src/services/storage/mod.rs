pub mod disk;
pub mod s3;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::models::{FileRecord, NewUpload};
use crate::services::error::StorageError;
use crate::utils::checksum::Checksum;

pub use disk::DiskBackend;
pub use s3::S3Backend;

/// One page of upload records for the janitor. `next_cursor` is an opaque
/// backend-specific token; `None` means the enumeration is exhausted.
pub struct RecordPage {
    pub records: Vec<FileRecord>,
    pub next_cursor: Option<String>,
}

/// Contract every storage provider implements. The backend owns the
/// durable bytes and the persistence of the `FileRecord` itself.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Validate the declared size and metadata, assign an id if absent,
    /// and persist a fresh record with `bytes_written = 0`.
    async fn create(&self, new: NewUpload) -> Result<FileRecord, StorageError>;

    /// Append one chunk at `offset`. Fails with `OffsetMismatch` when
    /// `offset` is not the current committed offset and `SizeExceeded`
    /// when the write would grow past the declared size (or the configured
    /// maximum for deferred-length uploads). On success the bytes are
    /// durably committed and `bytes_written` has advanced. Reaching the
    /// declared size triggers the backend finalize step exactly once.
    ///
    /// When `checksum` is supplied, the digest is computed incrementally
    /// while the stream drains and verified before the record is
    /// committed; bytes of a mismatched chunk are never counted.
    async fn write<'a>(
        &self,
        id: &str,
        offset: u64,
        data: Box<dyn AsyncRead + Send + Unpin + 'a>,
        checksum: Option<Checksum>,
    ) -> Result<FileRecord, StorageError>;

    /// Latest committed snapshot, or `NotFound`.
    async fn get_meta(&self, id: &str) -> Result<FileRecord, StorageError>;

    /// Resolve a deferred length. At most once per upload; declaring the
    /// byte count already written finalizes the upload. Idempotent when
    /// the same size is declared again.
    async fn declare_size(&self, id: &str, size: u64) -> Result<FileRecord, StorageError>;

    /// Remove the upload and all provider-side residue (including any
    /// in-progress cloud multipart upload). Deleting an absent id is a
    /// successful no-op.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// One page of records. Never materializes the full set.
    async fn list(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage, StorageError>;
}

/// Upload ids land in file paths and object keys, so anything outside
/// this alphabet is rejected before it reaches a backend.
pub(crate) fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() || id.len() > 200 {
        return Err(StorageError::Validation(
            "upload id must be 1..=200 characters".to_string(),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::Validation(
            "upload id may only contain ASCII alphanumerics, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

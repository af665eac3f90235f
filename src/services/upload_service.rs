use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::models::{FileRecord, NewUpload};
use crate::services::error::StorageError;
use crate::services::locker::Locker;
use crate::services::storage::StorageBackend;
use crate::services::validation::{ValidationRule, run_chain};
use crate::utils::checksum::Checksum;

/// The resumable-upload state machine. Orchestrates the Locker, the
/// validator chain and the storage backend so that per-id state moves
/// `created -> receiving -> completed` no matter how chunks are retried
/// or reordered.
///
/// All collaborators are constructor-injected; multiple instances may
/// share or separate lock stores as the deployment requires.
pub struct UploadService {
    backend: Arc<dyn StorageBackend>,
    locker: Arc<dyn Locker>,
    validators: Vec<Box<dyn ValidationRule>>,
}

impl UploadService {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        locker: Arc<dyn Locker>,
        validators: Vec<Box<dyn ValidationRule>>,
    ) -> Self {
        Self {
            backend,
            locker,
            validators,
        }
    }

    /// `absent -> created`: run the validator chain, then let the backend
    /// persist a fresh record.
    pub async fn create(&self, new: NewUpload) -> Result<FileRecord, StorageError> {
        run_chain(&self.validators, &new)?;
        let record = self.backend.create(new).await?;
        tracing::info!(id = %record.id, size = ?record.size, "upload created");
        Ok(record)
    }

    /// Status query. Never takes the lock: reads may race with writes and
    /// observe the latest committed snapshot, never a partial one.
    pub async fn info(&self, id: &str) -> Result<FileRecord, StorageError> {
        self.backend.get_meta(id).await
    }

    /// Append one chunk. The lock is acquired before the backend is
    /// touched and released on every exit path; a concurrent append for
    /// the same id is rejected immediately with `Locked`. Offset
    /// mismatches are always surfaced to the client, never retried
    /// server-side.
    pub async fn append<'a>(
        &self,
        id: &str,
        offset: u64,
        data: Box<dyn AsyncRead + Send + Unpin + 'a>,
        checksum: Option<Checksum>,
        declared_size: Option<u64>,
    ) -> Result<FileRecord, StorageError> {
        let token = self.locker.lock(id).await?;
        let result = self
            .append_locked(id, offset, data, checksum, declared_size)
            .await;
        self.locker.unlock(id, token).await;

        match &result {
            Ok(record) => {
                tracing::debug!(id, offset = record.bytes_written, "chunk committed");
            }
            Err(e) if e.is_client_retryable() => {
                tracing::debug!(id, error = %e, "append rejected");
            }
            Err(e) => {
                tracing::error!(id, error = %e, "append failed");
            }
        }
        result
    }

    async fn append_locked<'a>(
        &self,
        id: &str,
        offset: u64,
        data: Box<dyn AsyncRead + Send + Unpin + 'a>,
        checksum: Option<Checksum>,
        declared_size: Option<u64>,
    ) -> Result<FileRecord, StorageError> {
        let meta = self.backend.get_meta(id).await?;

        if meta.is_complete() {
            return Err(StorageError::AlreadyCompleted);
        }
        if offset != meta.bytes_written {
            return Err(StorageError::OffsetMismatch {
                expected: meta.bytes_written,
                got: offset,
            });
        }
        if let Some(size) = declared_size {
            let record = self.backend.declare_size(id, size).await?;
            // Declaring the byte count already written finalizes the
            // upload; there is nothing left to stream.
            if record.is_complete() {
                tracing::info!(id, bytes = record.bytes_written, "upload completed");
                return Ok(record);
            }
        }

        let record = self.backend.write(id, offset, data, checksum).await?;
        if record.is_complete() {
            tracing::info!(id, bytes = record.bytes_written, "upload completed");
        }
        Ok(record)
    }

    /// Resolve a deferred length without appending bytes.
    pub async fn declare_size(&self, id: &str, size: u64) -> Result<FileRecord, StorageError> {
        let token = self.locker.lock(id).await?;
        let result = self.backend.declare_size(id, size).await;
        self.locker.unlock(id, token).await;
        result
    }

    /// `any -> absent`. Idempotent: terminating an unknown id succeeds.
    pub async fn terminate(&self, id: &str) -> Result<(), StorageError> {
        self.backend.delete(id).await?;
        tracing::info!(id, "upload terminated");
        Ok(())
    }
}

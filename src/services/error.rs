use thiserror::Error;

/// Shared error taxonomy raised by storage backends and the protocol
/// handler. Provider-specific SDK errors are wrapped into `Backend` at the
/// backend boundary and never leak past it, so handler logic only ever
/// branches on these variants.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("upload not found")]
    NotFound,

    /// The client sent a chunk for an offset that is not the current
    /// committed offset. Expected and retryable: the client must re-query
    /// the current offset before sending the next chunk.
    #[error("offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: u64, got: u64 },

    /// An append arrived for an upload that already reached its declared
    /// size. Terminal for the client, unlike a plain offset mismatch.
    #[error("upload is already complete")]
    AlreadyCompleted,

    #[error("upload exceeds the maximum size of {limit} bytes")]
    SizeExceeded { limit: u64 },

    /// A concurrent append holds the lock for this upload. Rejected
    /// immediately, never queued; the client controls retry and backoff.
    #[error("upload is locked by a concurrent request")]
    Locked,

    #[error("checksum mismatch: chunk was discarded")]
    ChecksumMismatch,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage backend unavailable: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StorageError {
    /// Wrap a provider/IO error at the backend boundary.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Backend(anyhow::Error::new(err))
    }

    /// Expected, client-retryable conditions. These are logged at debug
    /// level, never as server errors.
    pub fn is_client_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::OffsetMismatch { .. } | StorageError::Locked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            StorageError::OffsetMismatch {
                expected: 10,
                got: 0
            }
            .is_client_retryable()
        );
        assert!(StorageError::Locked.is_client_retryable());
        assert!(!StorageError::NotFound.is_client_retryable());
        assert!(!StorageError::ChecksumMismatch.is_client_retryable());
    }

    #[test]
    fn test_backend_wrapping_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone");
        let err = StorageError::backend(io);
        assert!(err.to_string().contains("storage backend unavailable"));
    }
}

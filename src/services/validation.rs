use crate::models::NewUpload;
use crate::services::error::StorageError;

/// One pre-write acceptance rule. Rules are pure -- no side effects, no
/// backend access -- so they can be unit tested in isolation and run in
/// order before anything is forwarded to storage. The first failure wins.
pub trait ValidationRule: Send + Sync {
    fn check(&self, candidate: &NewUpload) -> Result<(), StorageError>;
}

/// Rejects uploads whose declared size exceeds the configured maximum.
/// Deferred-length uploads pass here; the backend caps their growth at
/// write time instead.
pub struct MaxSizeRule {
    max_size: u64,
}

impl MaxSizeRule {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }
}

impl ValidationRule for MaxSizeRule {
    fn check(&self, candidate: &NewUpload) -> Result<(), StorageError> {
        match candidate.size {
            Some(size) if size > self.max_size => Err(StorageError::SizeExceeded {
                limit: self.max_size,
            }),
            _ => Ok(()),
        }
    }
}

/// Run a chain of rules against a creation candidate.
pub fn run_chain(
    rules: &[Box<dyn ValidationRule>],
    candidate: &NewUpload,
) -> Result<(), StorageError> {
    for rule in rules {
        rule.check(candidate)?;
    }
    Ok(())
}

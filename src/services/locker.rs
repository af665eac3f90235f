use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::services::error::StorageError;

/// Proof of one lock acquisition. `unlock` only releases the hold that
/// produced the token, so a holder whose TTL already lapsed cannot free
/// the lock a successor acquired in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(u64);

/// Per-upload mutual exclusion. `lock` either acquires an exclusive hold
/// or fails immediately with `StorageError::Locked` -- contention is never
/// queued, so the client stays in control of retry and backoff.
///
/// The lock is best-effort: the offset check in the protocol handler is
/// the authoritative defense against corruption. Implementations must
/// auto-release after a TTL so a crashed holder cannot wedge an id.
#[async_trait]
pub trait Locker: Send + Sync {
    async fn lock(&self, key: &str) -> Result<LockToken, StorageError>;
    async fn unlock(&self, key: &str, token: LockToken);
}

struct Hold {
    token: u64,
    deadline: Instant,
}

/// In-process lock table with TTL-based auto-release. Only protects
/// against races within one process; multi-process deployments need a
/// shared lock store behind the same trait.
pub struct MemoryLocker {
    ttl: Duration,
    next_token: AtomicU64,
    held: Mutex<HashMap<String, Hold>>,
}

impl MemoryLocker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_token: AtomicU64::new(0),
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn lock(&self, key: &str) -> Result<LockToken, StorageError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        // A hold past its deadline counts as released.
        if let Some(hold) = held.get(key) {
            if hold.deadline > now {
                return Err(StorageError::Locked);
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(
            key.to_string(),
            Hold {
                token,
                deadline: now + self.ttl,
            },
        );
        Ok(LockToken(token))
    }

    async fn unlock(&self, key: &str, token: LockToken) {
        let mut held = self.held.lock().await;
        if held.get(key).is_some_and(|hold| hold.token == token.0) {
            held.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_rejects_second_holder() {
        let locker = MemoryLocker::new(Duration::from_secs(30));
        locker.lock("upload-1").await.unwrap();
        assert!(matches!(
            locker.lock("upload-1").await,
            Err(StorageError::Locked)
        ));
        // Different ids share no state.
        locker.lock("upload-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_releases() {
        let locker = MemoryLocker::new(Duration::from_secs(30));
        let token = locker.lock("upload-1").await.unwrap();
        locker.unlock("upload-1", token).await;
        locker.lock("upload-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_auto_release() {
        let locker = MemoryLocker::new(Duration::from_millis(10));
        locker.lock("upload-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        // The crashed holder never called unlock; the TTL frees the id.
        locker.lock("upload-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_unlock_does_not_release_successor() {
        let locker = MemoryLocker::new(Duration::from_millis(10));
        let stale = locker.lock("upload-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // TTL lapsed; a successor takes over the id.
        let fresh = locker.lock("upload-1").await.unwrap();

        // The stale holder finishing late must not free the new hold.
        locker.unlock("upload-1", stale).await;
        assert!(matches!(
            locker.lock("upload-1").await,
            Err(StorageError::Locked)
        ));

        locker.unlock("upload-1", fresh).await;
        locker.lock("upload-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_unknown_key_is_noop() {
        let locker = MemoryLocker::new(Duration::from_secs(30));
        let token = locker.lock("other").await.unwrap();
        locker.unlock("never-locked", token).await;
    }
}

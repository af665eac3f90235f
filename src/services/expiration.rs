use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::config::UploadConfig;
use crate::services::storage::StorageBackend;

const SWEEP_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// One full pass over the backend: page through `list()` and purge every
/// record older than `max_age`, regardless of status. A failure deleting
/// one record is logged and skipped, never aborting the remainder.
pub async fn sweep(backend: &Arc<dyn StorageBackend>, max_age: chrono::Duration) -> SweepStats {
    let mut stats = SweepStats::default();
    let mut cursor: Option<String> = None;
    let now = Utc::now();

    loop {
        let page = match backend.list(cursor.take(), SWEEP_PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(error = %e, "janitor sweep aborted: listing failed");
                break;
            }
        };

        for record in page.records {
            stats.scanned += 1;
            if record.age(now) < max_age {
                continue;
            }
            match backend.delete(&record.id).await {
                Ok(()) => {
                    tracing::info!(id = %record.id, "expired upload purged");
                    stats.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "failed to purge expired upload, skipping");
                    stats.failed += 1;
                }
            }
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    stats
}

/// Background janitor task: sweeps at the configured interval until the
/// shutdown channel flips.
pub async fn janitor_worker(
    backend: Arc<dyn StorageBackend>,
    config: UploadConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(config.janitor_interval_secs);
    let max_age = chrono::Duration::hours(config.expiration_max_age_hours);

    loop {
        tracing::info!("Running expiration janitor sweep...");
        let stats = sweep(&backend, max_age).await;
        tracing::info!(
            scanned = stats.scanned,
            deleted = stats.deleted,
            failed = stats.failed,
            "Janitor sweep finished"
        );

        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Janitor shutting down");
                    break;
                }
            }
        }
    }
}

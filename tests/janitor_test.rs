use std::sync::Arc;
use std::time::Duration;

use rust_upload_server::config::UploadConfig;
use rust_upload_server::models::NewUpload;
use rust_upload_server::services::expiration::{janitor_worker, sweep};
use rust_upload_server::services::storage::{DiskBackend, StorageBackend};

async fn backend() -> (Arc<dyn StorageBackend>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(DiskBackend::new(dir.path(), 1024 * 1024).await.unwrap());
    (backend, dir)
}

async fn seed(backend: &Arc<dyn StorageBackend>, count: usize) {
    for i in 0..count {
        backend
            .create(NewUpload {
                id: Some(format!("upload-{i:03}")),
                size: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_sweep_spares_records_younger_than_max_age() {
    let (backend, _dir) = backend().await;
    seed(&backend, 3).await;

    let stats = sweep(&backend, chrono::Duration::hours(1)).await;
    assert_eq!(stats.scanned, 3);
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.failed, 0);

    for i in 0..3 {
        backend.get_meta(&format!("upload-{i:03}")).await.unwrap();
    }
}

#[tokio::test]
async fn test_sweep_purges_records_at_or_past_max_age() {
    let (backend, _dir) = backend().await;
    seed(&backend, 3).await;

    // Zero max age: everything just created is already "at the age".
    let stats = sweep(&backend, chrono::Duration::zero()).await;
    assert_eq!(stats.scanned, 3);
    assert_eq!(stats.deleted, 3);

    let page = backend.list(None, 10).await.unwrap();
    assert!(page.records.is_empty());
}

#[tokio::test]
async fn test_sweep_walks_every_page() {
    let (backend, _dir) = backend().await;
    // More records than one janitor page (100) so the cursor is exercised.
    seed(&backend, 130).await;

    let stats = sweep(&backend, chrono::Duration::zero()).await;
    assert_eq!(stats.scanned, 130);
    assert_eq!(stats.deleted, 130);

    let page = backend.list(None, 200).await.unwrap();
    assert!(page.records.is_empty());
}

#[tokio::test]
async fn test_janitor_stops_on_shutdown_signal() {
    let (backend, _dir) = backend().await;
    let config = UploadConfig {
        janitor_interval_secs: 3600,
        ..UploadConfig::default()
    };
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(janitor_worker(backend, config, rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Flipping the channel must stop the worker well before the next
    // scheduled sweep.
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("janitor ignored the shutdown signal")
        .unwrap();
}

#[tokio::test]
async fn test_sweep_purges_completed_uploads_too() {
    let (backend, _dir) = backend().await;
    let record = backend
        .create(NewUpload {
            size: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();
    backend
        .write(
            &record.id,
            0,
            Box::new(std::io::Cursor::new(b"hello".to_vec())),
            None,
        )
        .await
        .unwrap();

    // Max age applies regardless of status.
    let stats = sweep(&backend, chrono::Duration::zero()).await;
    assert_eq!(stats.deleted, 1);
}

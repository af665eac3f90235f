use std::collections::BTreeMap;
use std::io::Cursor;

use rust_upload_server::models::{NewUpload, UploadStatus};
use rust_upload_server::services::error::StorageError;
use rust_upload_server::services::storage::{DiskBackend, StorageBackend};
use rust_upload_server::utils::checksum::Checksum;
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

const MAX_SIZE: u64 = 1024 * 1024;

async fn backend() -> (DiskBackend, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let backend = DiskBackend::new(dir.path(), MAX_SIZE).await.unwrap();
    (backend, dir)
}

fn reader(bytes: Vec<u8>) -> Box<dyn AsyncRead + Send + Unpin> {
    Box::new(Cursor::new(bytes))
}

fn new_upload(size: Option<u64>) -> NewUpload {
    NewUpload {
        size,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_get_meta_round_trip() {
    let (backend, _dir) = backend().await;

    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), "report.pdf".to_string());

    let created = backend
        .create(NewUpload {
            original_name: Some("report.pdf".to_string()),
            size: Some(42),
            metadata: metadata.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let fetched = backend.get_meta(&created.id).await.unwrap();
    assert_eq!(fetched.bytes_written, 0);
    assert_eq!(fetched.size, Some(42));
    assert_eq!(fetched.metadata, metadata);
    assert_eq!(fetched.status(), UploadStatus::Created);
}

#[tokio::test]
async fn test_sequential_writes_complete_exactly_once() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(Some(1000))).await.unwrap();

    let record = backend
        .write(&record.id, 0, reader(vec![b'a'; 500]), None)
        .await
        .unwrap();
    assert_eq!(record.bytes_written, 500);
    assert_eq!(record.status(), UploadStatus::Part);

    let record = backend
        .write(&record.id, 500, reader(vec![b'b'; 500]), None)
        .await
        .unwrap();
    assert_eq!(record.bytes_written, 1000);
    assert_eq!(record.status(), UploadStatus::Completed);

    // The upload is finished; even a correctly-offset append is refused.
    let err = backend
        .write(&record.id, 1000, reader(vec![b'c'; 1]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyCompleted));
}

#[tokio::test]
async fn test_offset_mismatch_leaves_bytes_unchanged() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(Some(100))).await.unwrap();

    let err = backend
        .write(&record.id, 10, reader(vec![b'x'; 10]), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::OffsetMismatch {
            expected: 0,
            got: 10
        }
    ));
    assert_eq!(backend.get_meta(&record.id).await.unwrap().bytes_written, 0);
}

#[tokio::test]
async fn test_write_past_declared_size_is_rejected() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(Some(10))).await.unwrap();

    let err = backend
        .write(&record.id, 0, reader(vec![b'x'; 20]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SizeExceeded { limit: 10 }));
    assert_eq!(backend.get_meta(&record.id).await.unwrap().bytes_written, 0);
}

#[tokio::test]
async fn test_create_rejects_size_over_maximum() {
    let (backend, _dir) = backend().await;
    let err = backend
        .create(new_upload(Some(MAX_SIZE + 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SizeExceeded { .. }));
}

#[tokio::test]
async fn test_checksum_mismatch_rolls_back() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(Some(11))).await.unwrap();

    let wrong = Checksum {
        algorithm: "sha256".to_string(),
        digest: hex::encode(Sha256::digest(b"something else")),
    };
    let err = backend
        .write(&record.id, 0, reader(b"hello world".to_vec()), Some(wrong))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ChecksumMismatch));
    assert_eq!(backend.get_meta(&record.id).await.unwrap().bytes_written, 0);

    // A verified retry of the same chunk succeeds and records the digest.
    let right = Checksum {
        algorithm: "sha256".to_string(),
        digest: hex::encode(Sha256::digest(b"hello world")),
    };
    let record = backend
        .write(&record.id, 0, reader(b"hello world".to_vec()), Some(right))
        .await
        .unwrap();
    assert_eq!(record.bytes_written, 11);
    assert_eq!(record.checksum.unwrap().algorithm, "sha256");
}

#[tokio::test]
async fn test_delete_is_idempotent_and_removes_record() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(Some(10))).await.unwrap();
    backend
        .write(&record.id, 0, reader(vec![b'x'; 10]), None)
        .await
        .unwrap();

    backend.delete(&record.id).await.unwrap();
    backend.delete(&record.id).await.unwrap();
    backend.delete("never-existed").await.unwrap();

    assert!(matches!(
        backend.get_meta(&record.id).await.unwrap_err(),
        StorageError::NotFound
    ));
}

#[tokio::test]
async fn test_deferred_length_declaration() {
    let (backend, _dir) = backend().await;
    let record = backend.create(new_upload(None)).await.unwrap();

    let record = backend
        .write(&record.id, 0, reader(b"hello".to_vec()), None)
        .await
        .unwrap();
    assert_eq!(record.status(), UploadStatus::Part);

    // Declaring below what is already written is invalid.
    assert!(matches!(
        backend.declare_size(&record.id, 3).await.unwrap_err(),
        StorageError::Validation(_)
    ));

    let record = backend.declare_size(&record.id, 5).await.unwrap();
    assert_eq!(record.status(), UploadStatus::Completed);

    // Re-declaring the same size is a no-op, a different one an error.
    backend.declare_size(&record.id, 5).await.unwrap();
    assert!(matches!(
        backend.declare_size(&record.id, 6).await.unwrap_err(),
        StorageError::Validation(_)
    ));
}

#[tokio::test]
async fn test_stream_error_rolls_back_uncommitted_bytes() {
    let (backend, dir) = backend().await;
    let record = backend.create(new_upload(None)).await.unwrap();

    // The client disconnects after 100 bytes made it into the stream.
    let stream = futures::stream::iter([
        Ok::<_, std::io::Error>(bytes::Bytes::from(vec![b'x'; 100])),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client gone",
        )),
    ]);
    let err = backend
        .write(&record.id, 0, Box::new(StreamReader::new(stream)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
    assert_eq!(backend.get_meta(&record.id).await.unwrap().bytes_written, 0);

    // The data file was truncated back to the committed offset.
    let data_path = dir.path().join(&record.id);
    assert_eq!(std::fs::metadata(&data_path).unwrap().len(), 0);

    // A shorter retry plus a length declaration finishes at exactly the
    // declared size, with nothing left over from the failed chunk.
    backend
        .write(&record.id, 0, reader(vec![b'y'; 10]), None)
        .await
        .unwrap();
    let record = backend.declare_size(&record.id, 10).await.unwrap();
    assert!(record.is_complete());
    assert_eq!(std::fs::metadata(&data_path).unwrap().len(), 10);
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let (backend, _dir) = backend().await;
    backend
        .create(NewUpload {
            id: Some("fixed-id".to_string()),
            size: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = backend
        .create(NewUpload {
            id: Some("fixed-id".to_string()),
            size: Some(1),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_list_paginates_without_duplicates() {
    let (backend, _dir) = backend().await;
    for i in 0..5 {
        backend
            .create(NewUpload {
                id: Some(format!("upload-{i}")),
                size: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = backend.list(cursor.take(), 2).await.unwrap();
        pages += 1;
        for record in &page.records {
            seen.push(record.id.clone());
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    seen.sort();
    assert_eq!(pages, 3);
    assert_eq!(
        seen,
        vec!["upload-0", "upload-1", "upload-2", "upload-3", "upload-4"]
    );
}

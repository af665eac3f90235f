use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::models::{FileRecord, NewUpload};
use crate::services::error::StorageError;
use crate::services::storage::{RecordPage, StorageBackend, validate_id};
use crate::utils::checksum::{Checksum, StreamingHasher};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Local-disk backend. Each upload is a data file `{dir}/{id}` plus a
/// JSON sidecar `{dir}/{id}.json` holding the `FileRecord`.
///
/// Chunks are written positionally at `offset`. POSIX gives no atomicity
/// for interleaved overlapping writes from retried requests, so the
/// Locker must serialize appends for the same id; the offset check here
/// rejects whatever slips past it.
pub struct DiskBackend {
    dir: PathBuf,
    max_size: u64,
}

impl DiskBackend {
    pub async fn new(dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(StorageError::backend)?;
        Ok(Self { dir, max_size })
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn load_record(&self, id: &str) -> Result<FileRecord, StorageError> {
        validate_id(id)?;
        let raw = match fs::read(self.record_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound);
            }
            Err(e) => return Err(StorageError::backend(e)),
        };
        serde_json::from_slice(&raw).map_err(StorageError::backend)
    }

    /// Committing the sidecar is the commit point for an append: the data
    /// file may already hold more bytes, but they do not count until the
    /// record says so.
    async fn store_record(&self, record: &FileRecord) -> Result<(), StorageError> {
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        let raw = serde_json::to_vec(record).map_err(StorageError::backend)?;
        fs::write(&tmp, raw).await.map_err(StorageError::backend)?;
        fs::rename(&tmp, self.record_path(&record.id))
            .await
            .map_err(StorageError::backend)
    }
}

#[async_trait]
impl StorageBackend for DiskBackend {
    async fn create(&self, new: NewUpload) -> Result<FileRecord, StorageError> {
        if let Some(size) = new.size {
            if size > self.max_size {
                return Err(StorageError::SizeExceeded {
                    limit: self.max_size,
                });
            }
        }

        let record = FileRecord::new(new);
        validate_id(&record.id)?;
        if self.load_record(&record.id).await.is_ok() {
            return Err(StorageError::Validation(format!(
                "upload id '{}' already exists",
                record.id
            )));
        }

        fs::File::create(self.data_path(&record.id))
            .await
            .map_err(StorageError::backend)?;
        self.store_record(&record).await?;
        Ok(record)
    }

    async fn write<'a>(
        &self,
        id: &str,
        offset: u64,
        mut data: Box<dyn AsyncRead + Send + Unpin + 'a>,
        checksum: Option<Checksum>,
    ) -> Result<FileRecord, StorageError> {
        let mut record = self.load_record(id).await?;

        if record.is_complete() {
            return Err(StorageError::AlreadyCompleted);
        }
        if offset != record.bytes_written {
            return Err(StorageError::OffsetMismatch {
                expected: record.bytes_written,
                got: offset,
            });
        }

        let cap = record.size.unwrap_or(self.max_size);
        let remaining = cap - offset;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(self.data_path(id))
            .await
            .map_err(StorageError::backend)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(StorageError::backend)?;

        let mut hasher = checksum.as_ref().map(|_| StreamingHasher::new());
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        let copied: Result<u64, StorageError> = async {
            let mut written: u64 = 0;
            loop {
                let n = data.read(&mut buf).await.map_err(StorageError::backend)?;
                if n == 0 {
                    break;
                }
                if written + n as u64 > remaining {
                    return Err(StorageError::SizeExceeded { limit: cap });
                }
                file.write_all(&buf[..n])
                    .await
                    .map_err(StorageError::backend)?;
                if let Some(hasher) = hasher.as_mut() {
                    hasher.update(&buf[..n]);
                }
                written += n as u64;
            }
            Ok(written)
        }
        .await;

        let written = match copied {
            Ok(written) => written,
            // Stream errors (client disconnects included) roll the data
            // file back to the committed offset: a failed chunk leaves no
            // residue for a shorter retry to inherit.
            Err(e) => {
                file.set_len(offset).await.map_err(StorageError::backend)?;
                file.sync_all().await.map_err(StorageError::backend)?;
                return Err(e);
            }
        };

        file.flush().await.map_err(StorageError::backend)?;
        file.sync_all().await.map_err(StorageError::backend)?;

        if let Some(expected) = checksum {
            let actual = hasher
                .map(StreamingHasher::finish)
                .unwrap_or_default();
            if actual != expected.digest {
                // Pre-commit rejection: roll the data file back to the
                // last committed offset so the chunk leaves no trace.
                file.set_len(offset).await.map_err(StorageError::backend)?;
                file.sync_all().await.map_err(StorageError::backend)?;
                return Err(StorageError::ChecksumMismatch);
            }
            record.checksum = Some(expected.info());
        }

        record.bytes_written = offset + written;
        if record.is_complete() {
            // A crash between a write and its sidecar commit can leave
            // stale bytes past the final offset; drop them now.
            file.set_len(record.bytes_written)
                .await
                .map_err(StorageError::backend)?;
        }
        self.store_record(&record).await?;
        Ok(record)
    }

    async fn get_meta(&self, id: &str) -> Result<FileRecord, StorageError> {
        self.load_record(id).await
    }

    async fn declare_size(&self, id: &str, size: u64) -> Result<FileRecord, StorageError> {
        let mut record = self.load_record(id).await?;

        if let Some(existing) = record.size {
            if existing == size {
                return Ok(record);
            }
            return Err(StorageError::Validation(
                "upload length was already declared".to_string(),
            ));
        }
        if size > self.max_size {
            return Err(StorageError::SizeExceeded {
                limit: self.max_size,
            });
        }
        if size < record.bytes_written {
            return Err(StorageError::Validation(format!(
                "declared length {size} is below the {} bytes already written",
                record.bytes_written
            )));
        }

        record.size = Some(size);
        if record.is_complete() {
            // Declaring the offset as the final length completes the
            // upload; truncate away any uncommitted bytes beyond it.
            let file = fs::OpenOptions::new()
                .write(true)
                .open(self.data_path(id))
                .await
                .map_err(StorageError::backend)?;
            file.set_len(size).await.map_err(StorageError::backend)?;
        }
        self.store_record(&record).await?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        for path in [self.data_path(id), self.record_path(id)] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::backend(e)),
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage, StorageError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await.map_err(StorageError::backend)?;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::backend)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();

        let start = match &cursor {
            Some(cursor) => ids.partition_point(|id| id <= cursor),
            None => 0,
        };
        let page: Vec<String> = ids[start..].iter().take(limit).cloned().collect();
        let next_cursor = if start + page.len() < ids.len() {
            page.last().cloned()
        } else {
            None
        };

        let mut records = Vec::with_capacity(page.len());
        for id in &page {
            match self.load_record(id).await {
                Ok(record) => records.push(record),
                // A sidecar deleted mid-listing is not an error.
                Err(StorageError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }
}

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::models::{CompletedPartInfo, FileRecord, NewUpload};
use crate::services::error::StorageError;
use crate::services::storage::{RecordPage, StorageBackend, validate_id};
use crate::utils::checksum::{Checksum, StreamingHasher};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// S3-compatible object storage backend (AWS S3, MinIO, and the S3
/// interoperability endpoints of GCS and similar providers).
///
/// The finished upload lives under the object key `{id}`. While an upload
/// is in flight the backend keeps two auxiliary objects: `{id}.info`
/// holding the serialized `FileRecord`, and `{id}.part` buffering bytes
/// below the provider's minimum part size. Every part except the last
/// must meet that minimum, so sub-threshold writes accumulate in the
/// buffer object until one provider-native part can be flushed.
pub struct S3Backend {
    client: Client,
    bucket: String,
    part_size: usize,
    max_size: u64,
}

impl S3Backend {
    pub fn new(client: Client, bucket: String, part_size: usize, max_size: u64) -> Self {
        Self {
            client,
            bucket,
            part_size,
            max_size,
        }
    }

    fn info_key(id: &str) -> String {
        format!("{id}.info")
    }

    fn part_key(id: &str) -> String {
        format!("{id}.part")
    }

    async fn load_record(&self, id: &str) -> Result<FileRecord, StorageError> {
        validate_id(id)?;
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::info_key(id))
            .send()
            .await;

        match res {
            Ok(output) => {
                let raw = output
                    .body
                    .collect()
                    .await
                    .map_err(StorageError::backend)?
                    .to_vec();
                serde_json::from_slice(&raw).map_err(StorageError::backend)
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Err(StorageError::NotFound)
                } else {
                    Err(StorageError::backend(service_error))
                }
            }
        }
    }

    async fn store_record(&self, record: &FileRecord) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(record).map_err(StorageError::backend)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::info_key(&record.id))
            .body(ByteStream::from(raw))
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;
        Ok(())
    }

    /// Bytes parked in `{id}.part` from earlier sub-threshold writes.
    async fn read_buffered(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::part_key(id))
            .send()
            .await;

        match res {
            Ok(output) => Ok(output
                .body
                .collect()
                .await
                .map_err(StorageError::backend)?
                .to_vec()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(Vec::new())
                } else {
                    Err(StorageError::backend(service_error))
                }
            }
        }
    }

    async fn put_buffered(&self, id: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::part_key(id))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;
        Ok(())
    }

    fn upload_id(record: &FileRecord) -> Result<&str, StorageError> {
        record.upload_id.as_deref().ok_or_else(|| {
            StorageError::Backend(anyhow::anyhow!(
                "record {} has no provider multipart upload id",
                record.id
            ))
        })
    }

    /// Upload one provider-native part and append it to the record's part
    /// list. Part numbers are 1-based and strictly increasing.
    async fn flush_part(
        &self,
        record: &mut FileRecord,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let part_number = record.parts.len() as i32 + 1;
        let upload_id = Self::upload_id(record)?.to_string();

        let res = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&record.id)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;

        record.parts.push(CompletedPartInfo {
            part_number,
            etag: res.e_tag().unwrap_or_default().to_string(),
        });
        Ok(())
    }

    /// Provider completion requires the parts sorted by number. A repeat
    /// call for an already-finished upload never reaches here: appends to
    /// completed uploads are rejected upstream, and `declare_size` is a
    /// no-op on re-declaration.
    async fn complete_multipart(&self, record: &mut FileRecord) -> Result<(), StorageError> {
        let upload_id = Self::upload_id(record)?.to_string();

        if record.parts.is_empty() {
            // Zero-byte upload: the multipart API refuses an empty part
            // list, so abort it and write an empty object instead.
            let _ = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&record.id)
                .upload_id(&upload_id)
                .send()
                .await;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&record.id)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await
                .map_err(|e| StorageError::backend(e.into_service_error()))?;
            return Ok(());
        }

        let mut parts = record.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&record.id)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;
        Ok(())
    }

    /// Flush any leftover buffer as the final (possibly sub-minimum) part
    /// and finish the provider multipart upload.
    async fn finalize(
        &self,
        record: &mut FileRecord,
        buffer: Vec<u8>,
    ) -> Result<(), StorageError> {
        if !buffer.is_empty() {
            self.flush_part(record, buffer).await?;
        }
        self.delete_object(&Self::part_key(&record.id)).await?;
        self.complete_multipart(record).await
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn create(&self, new: NewUpload) -> Result<FileRecord, StorageError> {
        if let Some(size) = new.size {
            if size > self.max_size {
                return Err(StorageError::SizeExceeded {
                    limit: self.max_size,
                });
            }
        }

        let mut record = FileRecord::new(new);
        validate_id(&record.id)?;
        if self.load_record(&record.id).await.is_ok() {
            return Err(StorageError::Validation(format!(
                "upload id '{}' already exists",
                record.id
            )));
        }

        let res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&record.id)
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;

        record.upload_id = Some(
            res.upload_id()
                .ok_or_else(|| {
                    StorageError::Backend(anyhow::anyhow!("provider returned no upload id"))
                })?
                .to_string(),
        );
        record.storage_key = Some(record.id.clone());

        self.store_record(&record).await?;
        Ok(record)
    }

    /// Checksum caveat: a mismatch is rejected cleanly while the chunk is
    /// still inside the `{id}.part` buffer. Once the chunk has grown large
    /// enough that provider parts were flushed mid-stream, those parts
    /// cannot be recalled -- the record's offset is not advanced, and a
    /// retried append overwrites the same part numbers.
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
        let mut buffer = self.read_buffered(id).await?;

        let mut hasher = checksum.as_ref().map(|_| StreamingHasher::new());
        let mut total = record.bytes_written;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            let n = data.read(&mut buf).await.map_err(StorageError::backend)?;
            if n == 0 {
                break;
            }
            if total + n as u64 > cap {
                return Err(StorageError::SizeExceeded { limit: cap });
            }
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
            buffer.extend_from_slice(&buf[..n]);
            total += n as u64;

            while buffer.len() >= self.part_size {
                let rest = buffer.split_off(self.part_size);
                let full = std::mem::replace(&mut buffer, rest);
                self.flush_part(&mut record, full).await?;
            }
        }

        if let Some(expected) = checksum {
            let actual = hasher
                .map(StreamingHasher::finish)
                .unwrap_or_default();
            if actual != expected.digest {
                return Err(StorageError::ChecksumMismatch);
            }
            record.checksum = Some(expected.info());
        }

        record.bytes_written = total;

        if record.is_complete() {
            self.finalize(&mut record, buffer).await?;
        } else if buffer.is_empty() {
            self.delete_object(&Self::part_key(id)).await?;
        } else {
            self.put_buffered(id, buffer).await?;
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
            let buffer = self.read_buffered(id).await?;
            self.finalize(&mut record, buffer).await?;
        }

        self.store_record(&record).await?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let record = match self.load_record(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        // Abort any in-progress provider multipart upload so it stops
        // accruing billable part storage. Already-finished uploads make
        // this fail with NoSuchUpload, which is fine.
        if let Some(upload_id) = &record.upload_id {
            if !record.is_complete() {
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&record.id)
                    .upload_id(upload_id)
                    .send()
                    .await;
            }
        }

        self.delete_object(&record.id).await?;
        self.delete_object(&Self::part_key(id)).await?;
        self.delete_object(&Self::info_key(id)).await?;
        Ok(())
    }

    async fn list(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage, StorageError> {
        let res = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(i32::try_from(limit).unwrap_or(1000))
            .set_continuation_token(cursor)
            .send()
            .await
            .map_err(|e| StorageError::backend(e.into_service_error()))?;

        let mut records = Vec::new();
        if let Some(contents) = res.contents {
            for object in contents {
                let Some(key) = object.key else { continue };
                let Some(id) = key.strip_suffix(".info") else {
                    continue;
                };
                match self.load_record(id).await {
                    Ok(record) => records.push(record),
                    // Deleted between listing and fetch.
                    Err(StorageError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let next_cursor = if res.is_truncated.unwrap_or(false) {
            res.next_continuation_token
        } else {
            None
        };

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }
}

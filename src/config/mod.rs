use std::env;

/// Every part except the last must meet the provider minimum on
/// S3-compatible backends.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Upload engine configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum total upload size in bytes (default: 1 GB)
    pub max_upload_size: u64,

    /// Part size threshold for cloud multipart flushes in bytes
    /// (default: 8 MB, clamped to the 5 MB provider minimum)
    pub part_size: usize,

    /// Lock TTL in seconds. A crashed append auto-releases its upload id
    /// after this long (default: 30)
    pub lock_ttl_secs: u64,

    /// Uploads older than this are purged by the janitor regardless of
    /// status, in hours (default: 24)
    pub expiration_max_age_hours: i64,

    /// Janitor sweep interval in seconds (default: 3600)
    pub janitor_interval_secs: u64,

    /// Storage backend: "disk" or "s3" (default: "disk")
    pub storage_backend: String,

    /// Directory for the disk backend (default: "./data/uploads")
    pub disk_dir: String,

    /// Custom S3 endpoint URL (MinIO, GCS/Azure interop); None uses the
    /// AWS default resolution
    pub s3_endpoint: Option<String>,
    /// S3 region (default: "us-east-1")
    pub s3_region: String,
    /// S3 bucket (default: "uploads")
    pub s3_bucket: String,
    /// Static S3 credentials; None falls back to the ambient provider chain
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 1024 * 1024 * 1024, // 1 GB
            part_size: 8 * 1024 * 1024,          // 8 MB
            lock_ttl_secs: 30,
            expiration_max_age_hours: 24,
            janitor_interval_secs: 3600,
            storage_backend: "disk".to_string(),
            disk_dir: "./data/uploads".to_string(),
            s3_endpoint: None,
            s3_region: "us-east-1".to_string(),
            s3_bucket: "uploads".to_string(),
            s3_access_key: None,
            s3_secret_key: None,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: env::var("UPLOAD_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            part_size: env::var("UPLOAD_PART_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.part_size)
                .max(MIN_PART_SIZE),

            lock_ttl_secs: env::var("UPLOAD_LOCK_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.lock_ttl_secs),

            expiration_max_age_hours: env::var("UPLOAD_MAX_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.expiration_max_age_hours),

            janitor_interval_secs: env::var("UPLOAD_JANITOR_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.janitor_interval_secs),

            storage_backend: env::var("UPLOAD_STORAGE_BACKEND")
                .unwrap_or(default.storage_backend),

            disk_dir: env::var("UPLOAD_DISK_DIR").unwrap_or(default.disk_dir),

            s3_endpoint: env::var("UPLOAD_S3_ENDPOINT").ok(),
            s3_region: env::var("UPLOAD_S3_REGION").unwrap_or(default.s3_region),
            s3_bucket: env::var("UPLOAD_S3_BUCKET").unwrap_or(default.s3_bucket),
            s3_access_key: env::var("UPLOAD_S3_ACCESS_KEY").ok(),
            s3_secret_key: env::var("UPLOAD_S3_SECRET_KEY").ok(),
        }
    }

    /// Create config for development (disk backend, relaxed limits,
    /// aggressive janitor for quick feedback)
    pub fn development() -> Self {
        Self {
            janitor_interval_secs: 60,
            ..Self::default()
        }
    }
}

use std::sync::Arc;

use anyhow::{Context, bail};
use aws_sdk_s3::config::Region;
use tracing::info;

use crate::config::UploadConfig;
use crate::services::storage::{DiskBackend, S3Backend, StorageBackend};

/// Configuration-driven backend factory: one concrete type per provider,
/// selected by `UPLOAD_STORAGE_BACKEND`.
pub async fn setup_storage(config: &UploadConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.storage_backend.as_str() {
        "disk" => {
            info!("💾 Disk storage: {}", config.disk_dir);
            let backend = DiskBackend::new(&config.disk_dir, config.max_upload_size)
                .await
                .context("failed to initialize disk storage directory")?;
            Ok(Arc::new(backend))
        }
        "s3" => {
            let client = build_s3_client(config).await;
            ensure_bucket(&client, &config.s3_bucket).await;
            info!(
                "☁️  S3 Storage: {} (Bucket: {})",
                config.s3_endpoint.as_deref().unwrap_or("aws-default"),
                config.s3_bucket
            );
            Ok(Arc::new(S3Backend::new(
                client,
                config.s3_bucket.clone(),
                config.part_size,
                config.max_upload_size,
            )))
        }
        other => bail!("unknown storage backend '{other}' (expected 'disk' or 's3')"),
    }
}

async fn build_s3_client(config: &UploadConfig) -> aws_sdk_s3::Client {
    let mut loader = aws_config::from_env().region(Region::new(config.s3_region.clone()));

    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (&config.s3_access_key, &config.s3_secret_key) {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }

    let aws_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

async fn ensure_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(_) => {
            info!("🪣 Bucket '{}' not found, creating...", bucket);
            if let Err(e) = client.create_bucket().bucket(bucket).send().await {
                tracing::error!("❌ Failed to create bucket '{}': {}", bucket, e);
            } else {
                info!("✅ Bucket '{}' created successfully", bucket);
            }
        }
    }
}

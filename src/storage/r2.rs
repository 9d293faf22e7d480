use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

use super::BlobStore;
use crate::config::StorageConfig;

/// Cloudflare R2 (or any S3-compatible) bucket
pub struct R2Store {
    client: S3Client,
    bucket: String,
}

impl R2Store {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let endpoint = config
            .effective_endpoint()
            .context("No R2 endpoint configured")?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config).endpoint_url(&endpoint);

        // Static keys from config win over the ambient AWS credential chain
        if !config.access_key_id.is_empty() {
            builder = builder.credentials_provider(Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                None,
                None,
                "channel-archiver",
            ));
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            endpoint = %endpoint,
            "R2 store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for R2Store {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size_bytes = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        debug!("Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("Failed to upload {} to R2", key))?;

        info!("Successfully uploaded file: {}", key);
        Ok(())
    }
}

pub mod local;
pub mod r2;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{StorageBackend, StorageConfig};

/// Durable home for archived media.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`. A single put is atomic from the caller's view.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Build the blob store selected in config
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::R2 => Arc::new(r2::R2Store::new(config).await?),
        StorageBackend::Local => Arc::new(local::LocalStore::new(&config.directory)),
    };
    Ok(store)
}

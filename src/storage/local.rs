use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::BlobStore;

/// Sidecar written next to every stored object
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub content_type: String,
    pub size_bytes: usize,
}

/// Directory-backed store for local development
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Map a key onto a path below the root, refusing anything that could escape it.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            anyhow::bail!("Refusing to store object under unsafe key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

fn meta_path(object_path: &Path) -> PathBuf {
    let mut name = object_path.as_os_str().to_os_string();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Write via a temp file in the same directory so readers never see a partial object
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().context("Object path has no parent directory")?;
    let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to move file into place: {}", path.display()));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directories: {}", parent.display()))?;
        }

        let meta = ObjectMeta {
            content_type: content_type.to_string(),
            size_bytes: bytes.len(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta).context("Failed to encode object metadata")?;

        write_atomic(&path, &bytes).await?;
        write_atomic(&meta_path(&path), &meta_json).await?;

        info!("Stored file locally: {}", path.display());
        Ok(())
    }
}

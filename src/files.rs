//! File system seam

use async_trait::async_trait;
use std::path::Path;

use crate::Result;

/// File operations needed by the upload pipeline
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Remove a file
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Size of a file in bytes
    async fn size(&self, path: &Path) -> Result<u64>;

    /// Create a directory and its parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// [`FileStorage`] on the local file system
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileStorage;

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

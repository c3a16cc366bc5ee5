//! Artifact storage for downloaded media and published feed documents.
//!
//! Media artifacts live at `<feed_id>/<episode_file_name>`; feed documents at
//! `<feed_id>.xml` and `podsync.opml`. Two backends implement the
//! [`ArtifactStore`] capability:
//!
//! - [`local::LocalStorage`] - rooted at the data directory, also served
//!   over HTTP
//! - [`s3::S3Storage`] - S3-compatible object store; external hosting is
//!   assumed, so artifacts are not served by this process

use crate::config::{StorageConfig, StorageType};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

/// Readable stream handed to [`ArtifactStore::create`]
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

/// Object operations over the artifact backend
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stream `reader` into the object at `path`, returning bytes written
    async fn create(&self, path: &str, reader: ArtifactReader) -> Result<u64>;

    /// Delete the object at `path`.
    ///
    /// A missing object fails with [`crate::error::Error::NotExist`] so
    /// callers can treat deletion as idempotent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Size in bytes of the object at `path`, or
    /// [`crate::error::Error::NotExist`]
    async fn size(&self, path: &str) -> Result<u64>;
}

/// Construct the artifact store selected by the configuration
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage_type {
        StorageType::Local => Ok(Arc::new(LocalStorage::new(config.local.data_dir.clone()))),
        StorageType::S3 => Ok(Arc::new(S3Storage::new(config.s3.clone())?)),
    }
}

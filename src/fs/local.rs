//! Local filesystem artifact storage.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{ArtifactReader, ArtifactStore};

/// Artifact storage rooted at a data directory.
///
/// Writes go through a temporary file renamed into place, so readers served
/// over HTTP never observe a half-written artifact.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a store rooted at `root`; the directory is created lazily
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory artifacts are stored under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an artifact path below the root, rejecting traversal
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(Error::InvalidInput(format!(
                "artifact path escapes the data dir: {name}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    async fn create(&self, path: &str, mut reader: ArtifactReader) -> Result<u64> {
        let destination = self.resolve(path)?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp-and-rename keeps partially written files out of the HTTP
        // served tree.
        let file_name = destination
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("bad artifact path: {path}")))?;
        let tmp = destination.with_file_name(format!(".{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Error::Io(e));
            }
        };
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &destination).await?;

        tracing::debug!(path, written, "artifact written");
        Ok(written)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let destination = self.resolve(path)?;
        match tokio::fs::remove_file(&destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotExist(path.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let destination = self.resolve(path)?;
        match tokio::fs::metadata(&destination).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotExist(path.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

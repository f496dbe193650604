// Filesystem BlobStore Implementation

use async_trait::async_trait;
use perennial_core::domain::Fingerprint;
use perennial_core::error::{AppError, Result};
use perennial_core::port::BlobStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Blobs on local disk at `<root>/<ab>/<cd>/<fingerprint>`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a partial blob.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, fingerprint: &Fingerprint) -> Result<PathBuf> {
        // Fingerprints become path segments; only accept plain hex digests
        if fingerprint.len() < 4 || !fingerprint.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AppError::Validation(format!(
                "invalid fingerprint: {fingerprint:?}"
            )));
        }
        Ok(self
            .root
            .join(&fingerprint[0..2])
            .join(&fingerprint[2..4])
            .join(fingerprint))
    }
}

fn not_found(fingerprint: &Fingerprint) -> AppError {
    AppError::NotFound(format!("blob {fingerprint}"))
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, fingerprint: &Fingerprint, content: &[u8]) -> Result<()> {
        let path = self.path_for(fingerprint)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, content).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(fingerprint = %fingerprint, bytes = content.len(), "Blob written");
        Ok(())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        let path = self.path_for(fingerprint)?;
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(fingerprint)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let path = self.path_for(fingerprint)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let path = self.path_for(fingerprint)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn content_size(&self, fingerprint: &Fingerprint) -> Result<u64> {
        let path = self.path_for(fingerprint)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(fingerprint)),
            Err(e) => Err(e.into()),
        }
    }
}

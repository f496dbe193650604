// Content Store - content-addressed, deduplicating storage of poll results

use crate::domain::source::fingerprint;
use crate::domain::{Fingerprint, PollableRef, Source};
use crate::error::{AppError, Result};
use crate::port::{BlobStore, SourceRepository, SourceRepositoryTransaction, TimeProvider};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Source rows in the relational store, raw bytes in the blob store.
///
/// A blob is written before its row becomes durable and deleted again when
/// the creating transaction does not commit. Blobs are never rewritten.
pub struct ContentStore {
    repo: Arc<dyn SourceRepository>,
    blobs: Arc<dyn BlobStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl ContentStore {
    pub fn new(
        repo: Arc<dyn SourceRepository>,
        blobs: Arc<dyn BlobStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            repo,
            blobs,
            time_provider,
        }
    }

    /// Open a transaction for storing several contents atomically
    pub async fn begin(&self) -> Result<ContentStoreTransaction> {
        Ok(ContentStoreTransaction {
            tx: Some(self.repo.begin_transaction().await?),
            repo: Arc::clone(&self.repo),
            blobs: Arc::clone(&self.blobs),
            time_provider: Arc::clone(&self.time_provider),
            written: Vec::new(),
        })
    }

    /// Store `content` for `pollable` in its own transaction
    pub async fn store(&self, pollable: &PollableRef, content: &[u8]) -> Result<Fingerprint> {
        let mut tx = self.begin().await?;
        match tx.store(pollable, content).await {
            Ok(fingerprint) => {
                tx.commit().await?;
                Ok(fingerprint)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Look up a source; its content is loaded on first access
    pub async fn retrieve(&self, fingerprint: &Fingerprint) -> Result<Option<SourceHandle>> {
        Ok(self
            .repo
            .find(fingerprint)
            .await?
            .map(|source| SourceHandle::new(source, Arc::clone(&self.blobs))))
    }

    /// Delete the row; the blob goes only once the deletion committed
    pub async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let mut tx = self.repo.begin_transaction().await?;
        let deleted = match tx.delete(fingerprint).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };
        tx.commit().await?;

        if deleted {
            // Row is gone for good; a leftover blob is unreachable, not corrupt
            if let Err(e) = self.blobs.delete(fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to delete blob");
            }
            info!(fingerprint = %fingerprint, "Source deleted");
        }
        Ok(deleted)
    }

    /// Sources stored for one pollable, oldest first
    pub async fn sources_for(&self, pollable: &PollableRef) -> Result<Vec<Source>> {
        self.repo.find_by_pollable(pollable).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.repo.count().await
    }
}

/// Unit of work over the content store.
///
/// Tracks the blobs it wrote so they can be removed when the transaction
/// rolls back, fails to commit, or is dropped unfinished.
pub struct ContentStoreTransaction {
    tx: Option<Box<dyn SourceRepositoryTransaction>>,
    repo: Arc<dyn SourceRepository>,
    blobs: Arc<dyn BlobStore>,
    time_provider: Arc<dyn TimeProvider>,
    written: Vec<Fingerprint>,
}

impl ContentStoreTransaction {
    /// Store `content`; a content already present is a dedup hit without blob I/O
    pub async fn store(&mut self, pollable: &PollableRef, content: &[u8]) -> Result<Fingerprint> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| AppError::InvalidState("transaction already finished".to_string()))?;

        let fingerprint = fingerprint(content);
        if tx.exists(&fingerprint).await? {
            debug!(fingerprint = %fingerprint, "Content already stored");
            return Ok(fingerprint);
        }

        let source = Source {
            fingerprint: fingerprint.clone(),
            pollable: pollable.clone(),
            created_at: self.time_provider.now_millis(),
        };
        if !tx.insert(&source).await? {
            debug!(fingerprint = %fingerprint, "Content stored concurrently");
            return Ok(fingerprint);
        }

        self.blobs.put(&fingerprint, content).await?;
        self.written.push(fingerprint.clone());
        debug!(fingerprint = %fingerprint, size = content.len(), "Blob written");
        Ok(fingerprint)
    }

    pub async fn commit(mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        match tx.commit().await {
            Ok(()) => {
                if !self.written.is_empty() {
                    info!(count = self.written.len(), "Sources stored");
                }
                self.written.clear();
                Ok(())
            }
            Err(e) => {
                self.discard_blobs().await;
                Err(e)
            }
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        let result = match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        };
        self.discard_blobs().await;
        result
    }

    async fn discard_blobs(&mut self) {
        let written = std::mem::take(&mut self.written);
        discard_unreferenced(self.repo.as_ref(), self.blobs.as_ref(), written).await;
    }
}

/// Delete blobs no committed row points to.
///
/// Another transaction storing the same content may have committed since
/// the blob was written; its row keeps the blob.
async fn discard_unreferenced(
    repo: &dyn SourceRepository,
    blobs: &dyn BlobStore,
    fingerprints: Vec<Fingerprint>,
) {
    for fingerprint in fingerprints {
        match repo.find(&fingerprint).await {
            Ok(Some(_)) => {
                debug!(fingerprint = %fingerprint, "Blob committed by another transaction, kept");
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Cannot check blob owner, keeping blob");
                continue;
            }
        }
        match blobs.delete(&fingerprint).await {
            Ok(_) => debug!(fingerprint = %fingerprint, "Orphaned blob removed"),
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Failed to remove orphaned blob"),
        }
    }
}

impl Drop for ContentStoreTransaction {
    fn drop(&mut self) {
        if self.written.is_empty() {
            return;
        }
        // Dropped without commit or rollback: the rows never become durable
        let written = std::mem::take(&mut self.written);
        let repo = Arc::clone(&self.repo);
        let blobs = Arc::clone(&self.blobs);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    discard_unreferenced(repo.as_ref(), blobs.as_ref(), written).await;
                });
            }
            Err(_) => warn!(count = written.len(), "Orphaned blobs left behind, no runtime"),
        }
    }
}

/// A stored source with lazily loaded content.
///
/// Content is fetched from the blob store on first access and cached for the
/// lifetime of the handle.
pub struct SourceHandle {
    source: Source,
    blobs: Arc<dyn BlobStore>,
    content: OnceCell<Vec<u8>>,
}

impl SourceHandle {
    fn new(source: Source, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            source,
            blobs,
            content: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.source.fingerprint
    }

    pub async fn raw_content(&self) -> Result<&[u8]> {
        let content = self
            .content
            .get_or_try_init(|| self.blobs.get(&self.source.fingerprint))
            .await?;
        Ok(content.as_slice())
    }

    /// Size of the stored blob, without loading it
    pub async fn content_size(&self) -> Result<u64> {
        match self.content.get() {
            Some(content) => Ok(content.len() as u64),
            None => self.blobs.content_size(&self.source.fingerprint).await,
        }
    }
}

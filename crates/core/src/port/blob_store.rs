// Blob Store Port - raw content addressed by fingerprint

use crate::domain::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write content under `fingerprint`, replacing any previous blob
    async fn put(&self, fingerprint: &Fingerprint, content: &[u8]) -> Result<()>;

    /// Read content; `AppError::NotFound` when absent
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>>;

    /// Remove content; `false` when there was nothing to remove
    async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool>;

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Size in bytes; `AppError::NotFound` when absent
    async fn content_size(&self, fingerprint: &Fingerprint) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory blob store counting reads and writes
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        blobs: Mutex<HashMap<Fingerprint, Vec<u8>>>,
        puts: AtomicUsize,
        gets: AtomicUsize,
    }

    impl InMemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn get_count(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put(&self, fingerprint: &Fingerprint, content: &[u8]) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.blobs
                .lock()
                .unwrap()
                .insert(fingerprint.clone(), content.to_vec());
            Ok(())
        }

        async fn get(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.blobs
                .lock()
                .unwrap()
                .get(fingerprint)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("blob {fingerprint}")))
        }

        async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
            Ok(self.blobs.lock().unwrap().remove(fingerprint).is_some())
        }

        async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
            Ok(self.blobs.lock().unwrap().contains_key(fingerprint))
        }

        async fn content_size(&self, fingerprint: &Fingerprint) -> Result<u64> {
            self.blobs
                .lock()
                .unwrap()
                .get(fingerprint)
                .map(|b| b.len() as u64)
                .ok_or_else(|| AppError::NotFound(format!("blob {fingerprint}")))
        }
    }
}

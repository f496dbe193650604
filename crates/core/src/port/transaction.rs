// Transaction port for atomic operations

use crate::domain::{Fingerprint, Source};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional SourceRepository operations
#[async_trait]
pub trait TransactionalSourceRepository: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn SourceRepositoryTransaction>>;
}

/// SourceRepository operations within a transaction
#[async_trait]
pub trait SourceRepositoryTransaction: Transaction {
    /// Whether a row with this fingerprint exists (within transaction)
    async fn exists(&mut self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Insert a source row; `false` when the fingerprint is already taken
    async fn insert(&mut self, source: &Source) -> Result<bool>;

    /// Delete a source row; `false` when it did not exist
    async fn delete(&mut self, fingerprint: &Fingerprint) -> Result<bool>;
}

// Port Layer - Interfaces for external dependencies

pub mod blob_store;
pub mod id_provider; // For deterministic testing
pub mod job_queue;
pub mod keyed_store;
pub mod meta_data_repository;
pub mod pollable;
pub mod source_repository;
pub mod time_provider;
pub mod transaction;
pub mod unique_job_lock_repository;

// Re-exports
pub use blob_store::BlobStore;
pub use id_provider::IdProvider;
pub use job_queue::{JobQueue, QueuedJob};
pub use keyed_store::{InMemoryKeyedStore, KeyedStore};
pub use meta_data_repository::PollableMetaDataRepository;
pub use pollable::{PollError, Pollable, PollableLoader};
pub use source_repository::SourceRepository;
pub use time_provider::TimeProvider;
pub use transaction::{SourceRepositoryTransaction, Transaction, TransactionalSourceRepository};
pub use unique_job_lock_repository::UniqueJobLockRepository;

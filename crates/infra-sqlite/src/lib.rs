// Perennial Infrastructure - SQLite Adapter
// Implements: PollableMetaDataRepository, UniqueJobLockRepository,
// SourceRepository (transactional), JobQueue

mod connection;
mod error;
mod job_queue;
mod meta_data_repository;
mod migration;
mod source_repository;
mod transaction;
mod unique_job_lock_repository;

pub use connection::create_pool;
pub use error::map_sqlx_error;
pub use job_queue::SqliteJobQueue;
pub use meta_data_repository::SqlitePollableMetaDataRepository;
pub use migration::run_migrations;
pub use source_repository::SqliteSourceRepository;
pub use sqlx::SqlitePool;
pub use transaction::SqliteSourceTransaction;
pub use unique_job_lock_repository::SqliteUniqueJobLockRepository;

// Note: sqlx::Error conversion goes through map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)

// Domain Layer - Pure business logic and entities

pub mod digest;
pub mod error;
pub mod guard;
pub mod meta_data;
pub mod pollable;
pub mod polling_frequency;
pub mod source;
pub mod unique_job_lock;

// Re-exports
pub use error::DomainError;
pub use guard::GuardLease;
pub use meta_data::{MetaDataId, PollState, PollableMetaData};
pub use pollable::{GuardKey, GuardOptions, Hook, PollableConfig, PollableConfigBuilder, PollableRef};
pub use polling_frequency::PollingFrequency;
pub use source::{Fingerprint, Source};
pub use unique_job_lock::{guard_key_digest, lock_digest, UniqueJobLock, POLL_JOB_KIND};

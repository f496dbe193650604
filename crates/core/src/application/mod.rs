// Application Layer - Use Cases and Business Logic

pub mod content_store;
pub mod guard;
pub mod poll_job;
pub mod pollables;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use content_store::{ContentStore, ContentStoreTransaction, SourceHandle};
pub use guard::{Guard, GuardError};
pub use poll_job::{JobUniqueness, PollJobArgs, PollJobClient, PollJobOutcome, PollJobRunner};
pub use pollables::PollableService;
pub use recovery::RecoveryService;
pub use registry::{FailureClass, LoadedPollable, PollableKind, PollableRegistry};
pub use retry::{BackoffPolicy, RetryDecision};
pub use scheduler::{Scheduler, TickSummary};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};

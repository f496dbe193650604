// Poll Job - admission, guarded execution, stagger and backoff

mod client;
mod runner;
mod uniqueness;

pub use client::PollJobClient;
pub use runner::PollJobRunner;
pub use uniqueness::JobUniqueness;

use crate::domain::MetaDataId;
use serde::{Deserialize, Serialize};

/// Payload of a queued poll job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollJobArgs {
    pub metadata_id: MetaDataId,
    /// Logical job id, recorded in the uniqueness row at admission
    pub job_id: String,
    /// 1-based; guard contention re-submits without consuming an attempt
    pub attempt: u32,
}

impl PollJobArgs {
    pub fn first(metadata_id: MetaDataId, job_id: impl Into<String>) -> Self {
        Self {
            metadata_id,
            job_id: job_id.into(),
            attempt: 1,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// What one run of a poll job ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollJobOutcome {
    Completed,
    /// Meta data row is gone; nothing to do
    MetaDataMissing,
    /// The entity behind the meta data is gone; the row was deactivated
    PollableMissing,
    /// No kind registered for the row's type tag
    UnknownKind,
    /// Row deactivated before or while the job ran
    Skipped,
    /// A deactivation error kind was raised
    Deactivated,
    RetryScheduled { attempt: u32, delay_ms: i64 },
    GuardContended { delay_ms: i64 },
    /// Attempts used up; the row was deactivated
    Exhausted,
}

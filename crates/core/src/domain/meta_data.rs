// Pollable Meta Data - polling life-cycle state machine

use crate::domain::error::{DomainError, Result};
use crate::domain::pollable::PollableRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Meta data row ID
pub type MetaDataId = i64;

/// Poll State
///
/// `Waiting -> Enqueued -> Polling -> Waiting` is the success loop.
/// `Deactivated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Waiting,
    Enqueued,
    Polling,
    Deactivated,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Waiting => "waiting",
            PollState::Enqueued => "enqueued",
            PollState::Polling => "polling",
            PollState::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(PollState::Waiting),
            "enqueued" => Ok(PollState::Enqueued),
            "polling" => Ok(PollState::Polling),
            "deactivated" => Ok(PollState::Deactivated),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Polling state of one pollable entity (exactly one row per entity)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollableMetaData {
    pub id: MetaDataId,
    pub pollable: PollableRef,
    pub state: PollState,

    /// Only meaningful while `Waiting`; epoch zero means "due immediately"
    pub next_polling: i64,
    pub last_polling: Option<i64>,

    pub deactivation_reason: Option<String>,
    pub deactivated_at: Option<i64>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl PollableMetaData {
    /// Create fresh meta data for a newly registered pollable
    ///
    /// # Arguments
    ///
    /// * `id` - Row ID (assigned by the repository)
    /// * `pollable` - The entity this row tracks
    /// * `now_millis` - Creation timestamp (injected, not system time)
    pub fn new(id: MetaDataId, pollable: PollableRef, now_millis: i64) -> Self {
        Self {
            id,
            pollable,
            state: PollState::Waiting,
            next_polling: 0,
            last_polling: None,
            deactivation_reason: None,
            deactivated_at: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    /// Waiting and past its next poll time
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.state == PollState::Waiting && self.next_polling <= now_millis
    }

    pub fn is_deactivated(&self) -> bool {
        self.state == PollState::Deactivated
    }

    /// Mark as handed to the job queue.
    ///
    /// Also re-arms an enqueued or polling row for a retry; `next_polling`
    /// is left untouched either way.
    pub fn enqueue(&mut self, now_millis: i64) -> Result<()> {
        match self.state {
            PollState::Waiting | PollState::Enqueued | PollState::Polling => {
                self.state = PollState::Enqueued;
                self.updated_at = now_millis;
                Ok(())
            }
            PollState::Deactivated => Err(self.invalid_transition(PollState::Enqueued)),
        }
    }

    /// Transition to Polling at the start of actual poll execution
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        // Polling -> Polling covers a job re-run after a worker crash
        if !matches!(self.state, PollState::Enqueued | PollState::Polling) {
            return Err(self.invalid_transition(PollState::Polling));
        }
        self.state = PollState::Polling;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Successful poll: back to Waiting with the next poll time
    pub fn complete(&mut self, now_millis: i64, next_polling: i64) -> Result<()> {
        if self.state != PollState::Polling {
            return Err(self.invalid_transition(PollState::Waiting));
        }
        self.state = PollState::Waiting;
        self.last_polling = Some(now_millis);
        self.next_polling = next_polling;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Permanently deactivate polling
    pub fn disable(&mut self, now_millis: i64, reason: impl Into<String>) -> Result<()> {
        if self.is_deactivated() {
            return Err(self.invalid_transition(PollState::Deactivated));
        }
        self.state = PollState::Deactivated;
        self.deactivation_reason = Some(reason.into());
        self.deactivated_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    fn invalid_transition(&self, to: PollState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PollableMetaData {
        PollableMetaData::new(1, PollableRef::new("Website", 7), 1_000)
    }

    #[test]
    fn test_new_meta_data_is_immediately_due() {
        let meta = meta();
        assert_eq!(meta.state, PollState::Waiting);
        assert_eq!(meta.next_polling, 0);
        assert!(meta.is_due(1_000));
    }

    #[test]
    fn test_success_loop() {
        let mut meta = meta();

        meta.enqueue(2_000).unwrap();
        assert_eq!(meta.state, PollState::Enqueued);
        assert!(!meta.is_due(2_000));

        meta.start(3_000).unwrap();
        assert_eq!(meta.state, PollState::Polling);

        meta.complete(4_000, 90_000).unwrap();
        assert_eq!(meta.state, PollState::Waiting);
        assert_eq!(meta.last_polling, Some(4_000));
        assert_eq!(meta.next_polling, 90_000);
        assert!(!meta.is_due(89_999));
        assert!(meta.is_due(90_000));
    }

    #[test]
    fn test_re_enqueue_keeps_next_polling() {
        let mut meta = meta();
        meta.next_polling = 500;
        meta.enqueue(1_000).unwrap();
        meta.enqueue(2_000).unwrap();
        assert_eq!(meta.state, PollState::Enqueued);
        assert_eq!(meta.next_polling, 500);

        meta.start(3_000).unwrap();
        meta.enqueue(4_000).unwrap();
        assert_eq!(meta.state, PollState::Enqueued);
        assert_eq!(meta.next_polling, 500);
    }

    #[test]
    fn test_start_requires_enqueued() {
        let mut meta = meta();
        let err = meta.start(2_000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(meta.state, PollState::Waiting);
    }

    #[test]
    fn test_complete_requires_polling() {
        let mut meta = meta();
        meta.enqueue(2_000).unwrap();
        assert!(meta.complete(3_000, 10_000).is_err());
        assert_eq!(meta.last_polling, None);
    }

    #[test]
    fn test_deactivation_is_terminal() {
        let mut meta = meta();
        meta.enqueue(2_000).unwrap();
        meta.disable(3_000, "resource gone").unwrap();

        assert!(meta.is_deactivated());
        assert_eq!(meta.deactivated_at, Some(3_000));
        assert_eq!(meta.deactivation_reason.as_deref(), Some("resource gone"));
        assert!(!meta.is_due(i64::MAX));

        assert!(meta.enqueue(4_000).is_err());
        assert!(meta.start(4_000).is_err());
        assert!(meta.complete(4_000, 5_000).is_err());
        assert!(meta.disable(4_000, "again").is_err());
        assert_eq!(meta.deactivation_reason.as_deref(), Some("resource gone"));
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            PollState::Waiting,
            PollState::Enqueued,
            PollState::Polling,
            PollState::Deactivated,
        ] {
            assert_eq!(state.as_str().parse::<PollState>().unwrap(), state);
        }
        assert!("paused".parse::<PollState>().is_err());
    }
}

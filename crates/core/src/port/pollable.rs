// Pollable Port - the user-supplied work performed under a guard

use crate::domain::GuardLease;
use crate::error::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single poll.
///
/// `kind` is matched against the deactivation and ignored error kinds of the
/// pollable's configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PollError {
    pub kind: String,
    pub message: String,
}

impl PollError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// An entity that can be polled
#[async_trait]
pub trait Pollable: Send + Sync + 'static {
    /// Perform the poll. Runs while the guard lock is held; `lease` lets the
    /// poll extend the reservation of its guard key.
    async fn poll(&self, lease: &GuardLease) -> std::result::Result<(), PollError>;
}

/// Loads pollables of one kind by id
#[async_trait]
pub trait PollableLoader: Send + Sync + 'static {
    type Pollable: Pollable;

    /// `None` when the entity no longer exists
    async fn load(&self, id: i64) -> Result<Option<Self::Pollable>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type DuringPoll = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

    /// Scripted pollable: pops one outcome per poll, succeeds once the script is empty
    #[derive(Clone)]
    pub struct ScriptedPollable {
        pub id: i64,
        pub guard_key: String,
        outcomes: Arc<Mutex<VecDeque<std::result::Result<(), PollError>>>>,
        polls: Arc<AtomicUsize>,
        hold_for_ms: Option<i64>,
        during_poll: Option<DuringPoll>,
    }

    impl ScriptedPollable {
        pub fn new(id: i64) -> Self {
            Self {
                id,
                guard_key: format!("pollable-{id}"),
                outcomes: Arc::new(Mutex::new(VecDeque::new())),
                polls: Arc::new(AtomicUsize::new(0)),
                hold_for_ms: None,
                during_poll: None,
            }
        }

        pub fn with_guard_key(mut self, key: impl Into<String>) -> Self {
            self.guard_key = key.into();
            self
        }

        /// Keep the guard key reserved for this long after acquisition
        pub fn holding_guard_for(mut self, millis: i64) -> Self {
            self.hold_for_ms = Some(millis);
            self
        }

        /// Run `f` inside every poll, while the guard is held
        pub fn during_poll<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn() -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            self.during_poll = Some(Arc::new(move || Box::pin(f())));
            self
        }

        pub fn fail_next(&self, error: PollError) {
            self.outcomes.lock().unwrap().push_back(Err(error));
        }

        pub fn poll_count(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Pollable for ScriptedPollable {
        async fn poll(&self, lease: &GuardLease) -> std::result::Result<(), PollError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = self.hold_for_ms {
                lease.hold_until(lease.acquired_at() + hold);
            }
            if let Some(during_poll) = &self.during_poll {
                during_poll().await;
            }
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    /// Loader over a fixed set of scripted pollables
    #[derive(Default, Clone)]
    pub struct ScriptedLoader {
        pollables: Arc<Mutex<HashMap<i64, ScriptedPollable>>>,
    }

    impl ScriptedLoader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&self, pollable: ScriptedPollable) {
            self.pollables.lock().unwrap().insert(pollable.id, pollable);
        }

        pub fn remove(&self, id: i64) {
            self.pollables.lock().unwrap().remove(&id);
        }
    }

    #[async_trait]
    impl PollableLoader for ScriptedLoader {
        type Pollable = ScriptedPollable;

        async fn load(&self, id: i64) -> Result<Option<ScriptedPollable>> {
            Ok(self.pollables.lock().unwrap().get(&id).cloned())
        }
    }
}

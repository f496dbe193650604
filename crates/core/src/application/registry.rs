// Pollable registry - resolves type tags to configured pollable kinds

use crate::domain::pollable::DEFAULT_GUARD_TIMEOUT;
use crate::domain::{GuardLease, PollableConfig};
use crate::error::Result;
use crate::port::{PollError, Pollable, PollableLoader};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// How a failed poll is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Deactivate immediately
    Deactivation,
    /// Retry as usual, reported as expected noise
    Ignored,
    Standard,
}

/// A loaded pollable bound to its kind's configuration
#[async_trait]
pub trait LoadedPollable: Send + Sync {
    fn guard_key(&self) -> String;
    fn guard_cooldown(&self) -> Duration;
    fn guard_timeout(&self) -> Duration;
    fn sleep_on_guard_locked(&self) -> bool;
    fn classify(&self, error: &PollError) -> FailureClass;
    fn run_before_hooks(&self);
    fn run_after_hooks(&self);
    /// Next poll time after a successful poll at `last_polling`
    fn next_polling(&self, last_polling: i64) -> i64;
    async fn poll(&self, lease: &GuardLease) -> std::result::Result<(), PollError>;
}

/// Type-erased pollable kind
#[async_trait]
pub trait PollableKind: Send + Sync {
    fn type_name(&self) -> &str;
    fn queue(&self) -> &str;
    fn guard_timeout(&self) -> Duration;
    async fn load(&self, pollable_id: i64) -> Result<Option<Box<dyn LoadedPollable>>>;
}

struct Kind<L: PollableLoader> {
    type_name: String,
    config: Arc<PollableConfig<L::Pollable>>,
    loader: L,
}

struct Bound<P> {
    pollable: P,
    type_name: String,
    config: Arc<PollableConfig<P>>,
}

#[async_trait]
impl<P: Pollable> LoadedPollable for Bound<P> {
    fn guard_key(&self) -> String {
        self.config.guard.key.resolve(&self.type_name, &self.pollable)
    }

    fn guard_cooldown(&self) -> Duration {
        self.config.guard.cooldown
    }

    fn guard_timeout(&self) -> Duration {
        self.config.guard.timeout
    }

    fn sleep_on_guard_locked(&self) -> bool {
        self.config.sleep_on_guard_locked
    }

    fn classify(&self, error: &PollError) -> FailureClass {
        if self.config.deactivation_errors.contains(&error.kind) {
            FailureClass::Deactivation
        } else if self.config.ignored_errors.contains(&error.kind) {
            FailureClass::Ignored
        } else {
            FailureClass::Standard
        }
    }

    fn run_before_hooks(&self) {
        for hook in &self.config.before_polling {
            hook(&self.pollable);
        }
    }

    fn run_after_hooks(&self) {
        for hook in &self.config.after_polling {
            hook(&self.pollable);
        }
    }

    fn next_polling(&self, last_polling: i64) -> i64 {
        self.config.polling_frequency.next(&self.pollable, last_polling)
    }

    async fn poll(&self, lease: &GuardLease) -> std::result::Result<(), PollError> {
        self.pollable.poll(lease).await
    }
}

#[async_trait]
impl<L: PollableLoader> PollableKind for Kind<L> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn queue(&self) -> &str {
        &self.config.queue
    }

    fn guard_timeout(&self) -> Duration {
        self.config.guard.timeout
    }

    async fn load(&self, pollable_id: i64) -> Result<Option<Box<dyn LoadedPollable>>> {
        let loaded = self.loader.load(pollable_id).await?;
        Ok(loaded.map(|pollable| {
            Box::new(Bound {
                pollable,
                type_name: self.type_name.clone(),
                config: Arc::clone(&self.config),
            }) as Box<dyn LoadedPollable>
        }))
    }
}

/// Every pollable kind known to the process, keyed by type tag.
///
/// Built once at startup, then shared read-only.
#[derive(Default)]
pub struct PollableRegistry {
    kinds: HashMap<String, Arc<dyn PollableKind>>,
}

impl PollableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; a later registration under the same tag replaces it
    pub fn register<L: PollableLoader>(
        &mut self,
        type_name: impl Into<String>,
        config: PollableConfig<L::Pollable>,
        loader: L,
    ) -> &mut Self {
        let type_name = type_name.into();
        let kind = Kind {
            type_name: type_name.clone(),
            config: Arc::new(config),
            loader,
        };
        self.kinds.insert(type_name, Arc::new(kind));
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn PollableKind>> {
        self.kinds.get(type_name).cloned()
    }

    /// Distinct queue names over all kinds, sorted
    pub fn queues(&self) -> Vec<String> {
        self.kinds
            .values()
            .map(|k| k.queue().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Longest guard lease any kind may hold (the default when nothing is registered)
    pub fn max_guard_timeout(&self) -> Duration {
        self.kinds
            .values()
            .map(|k| k.guard_timeout())
            .max()
            .unwrap_or(DEFAULT_GUARD_TIMEOUT)
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

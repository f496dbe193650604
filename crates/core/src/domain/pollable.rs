// Pollable identity and per-kind polling configuration

use crate::domain::error::Result;
use crate::domain::polling_frequency::PollingFrequency;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default queue poll jobs are submitted to
pub const DEFAULT_QUEUE: &str = "polling";

/// Default minimum spacing between two acquisitions of the same guard key
pub const DEFAULT_GUARD_COOLDOWN: Duration = Duration::from_secs(5);

/// Default lease duration of a guard lock
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Reference to exactly one pollable entity (type tag + id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollableRef {
    pub pollable_type: String,
    pub pollable_id: i64,
}

impl PollableRef {
    pub fn new(pollable_type: impl Into<String>, pollable_id: i64) -> Self {
        Self {
            pollable_type: pollable_type.into(),
            pollable_id,
        }
    }
}

impl fmt::Display for PollableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pollable_type, self.pollable_id)
    }
}

/// Hook run before each poll / after each successful poll
pub type Hook<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// How the guard key of a pollable is derived
pub enum GuardKey<P> {
    /// The registered type name of the pollable kind
    TypeName,
    /// One fixed key for every pollable of the kind
    Fixed(String),
    /// Derived from the pollable, e.g. the host of its URL
    Derived(Arc<dyn Fn(&P) -> String + Send + Sync>),
}

impl<P> GuardKey<P> {
    pub fn resolve(&self, type_name: &str, pollable: &P) -> String {
        match self {
            GuardKey::TypeName => type_name.to_string(),
            GuardKey::Fixed(key) => key.clone(),
            GuardKey::Derived(f) => f(pollable),
        }
    }
}

impl<P> fmt::Debug for GuardKey<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardKey::TypeName => write!(f, "TypeName"),
            GuardKey::Fixed(key) => write!(f, "Fixed({key:?})"),
            GuardKey::Derived(_) => write!(f, "Derived(<fn>)"),
        }
    }
}

/// Guard settings of a pollable kind
pub struct GuardOptions<P> {
    pub key: GuardKey<P>,
    pub cooldown: Duration,
    pub timeout: Duration,
}

impl<P> fmt::Debug for GuardOptions<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardOptions")
            .field("key", &self.key)
            .field("cooldown", &self.cooldown)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<P> Default for GuardOptions<P> {
    fn default() -> Self {
        Self {
            key: GuardKey::TypeName,
            cooldown: DEFAULT_GUARD_COOLDOWN,
            timeout: DEFAULT_GUARD_TIMEOUT,
        }
    }
}

/// Immutable configuration of one pollable kind.
///
/// Built once at startup through [`PollableConfig::builder`] and shared by
/// every job polling an entity of that kind.
pub struct PollableConfig<P> {
    pub polling_frequency: PollingFrequency<P>,
    pub before_polling: Vec<Hook<P>>,
    pub after_polling: Vec<Hook<P>>,
    pub queue: String,
    pub guard: GuardOptions<P>,
    /// Error kinds that deactivate the pollable on first occurrence
    pub deactivation_errors: HashSet<String>,
    /// Error kinds retried as usual but reported as expected noise
    pub ignored_errors: HashSet<String>,
    /// Block the worker until the guard frees up instead of staggering retries
    pub sleep_on_guard_locked: bool,
}

impl<P> PollableConfig<P> {
    pub fn builder() -> PollableConfigBuilder<P> {
        PollableConfigBuilder {
            config: PollableConfig::default(),
        }
    }
}

impl<P> Default for PollableConfig<P> {
    fn default() -> Self {
        Self {
            polling_frequency: PollingFrequency::Daily,
            before_polling: Vec::new(),
            after_polling: Vec::new(),
            queue: DEFAULT_QUEUE.to_string(),
            guard: GuardOptions::default(),
            deactivation_errors: HashSet::new(),
            ignored_errors: HashSet::new(),
            sleep_on_guard_locked: false,
        }
    }
}

impl<P> fmt::Debug for PollableConfig<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollableConfig")
            .field("polling_frequency", &self.polling_frequency)
            .field("before_polling", &self.before_polling.len())
            .field("after_polling", &self.after_polling.len())
            .field("queue", &self.queue)
            .field("guard", &self.guard)
            .field("deactivation_errors", &self.deactivation_errors)
            .field("ignored_errors", &self.ignored_errors)
            .field("sleep_on_guard_locked", &self.sleep_on_guard_locked)
            .finish()
    }
}

/// Builder for [`PollableConfig`]
pub struct PollableConfigBuilder<P> {
    config: PollableConfig<P>,
}

impl<P> PollableConfigBuilder<P> {
    pub fn polling_frequency(mut self, frequency: PollingFrequency<P>) -> Self {
        self.config.polling_frequency = frequency;
        self
    }

    /// Use a named preset (`hourly`, `daily`, `weekly`, `monthly`)
    pub fn polling_frequency_named(mut self, name: &str) -> Result<Self> {
        self.config.polling_frequency = PollingFrequency::by_name(name)?;
        Ok(self)
    }

    pub fn before_polling<F>(mut self, hook: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.config.before_polling.push(Arc::new(hook));
        self
    }

    pub fn after_polling<F>(mut self, hook: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.config.after_polling.push(Arc::new(hook));
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.config.queue = queue.into();
        self
    }

    pub fn guard_key(mut self, key: impl Into<String>) -> Self {
        self.config.guard.key = GuardKey::Fixed(key.into());
        self
    }

    pub fn guard_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        self.config.guard.key = GuardKey::Derived(Arc::new(f));
        self
    }

    pub fn guard_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.guard.cooldown = cooldown;
        self
    }

    pub fn guard_timeout(mut self, timeout: Duration) -> Self {
        self.config.guard.timeout = timeout;
        self
    }

    pub fn deactivate_on(mut self, kind: impl Into<String>) -> Self {
        self.config.deactivation_errors.insert(kind.into());
        self
    }

    pub fn ignore_error(mut self, kind: impl Into<String>) -> Self {
        self.config.ignored_errors.insert(kind.into());
        self
    }

    pub fn sleep_on_guard_locked(mut self, switch: bool) -> Self {
        self.config.sleep_on_guard_locked = switch;
        self
    }

    pub fn build(self) -> PollableConfig<P> {
        self.config
    }
}

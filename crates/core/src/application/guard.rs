// Guard - cooldown-aware advisory lock over the shared keyed store

use crate::domain::GuardLease;
use crate::error::AppError;
use crate::port::{IdProvider, KeyedStore, TimeProvider};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum GuardError {
    /// Another holder owns the key; not a failure, the caller decides how to wait
    #[error("Guard {key} is locked until {timeout_at}")]
    Locked { key: String, timeout_at: i64 },

    #[error("Guard store error: {0}")]
    Store(#[from] AppError),
}

/// Named, non-blocking mutex with cooldown.
///
/// `with_lock` tries to acquire once and never waits. After the critical
/// section the key stays reserved until `acquired_at + cooldown` (capped by
/// the timeout), so consecutive acquisitions are spaced at least one cooldown
/// apart even when the section is short.
pub struct Guard {
    store: Arc<dyn KeyedStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl Guard {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            store,
            time_provider,
            id_provider,
        }
    }

    /// Run `critical_section` while holding `key`.
    ///
    /// Fails with [`GuardError::Locked`] carrying the current holder's expiry
    /// when the key is taken.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        cooldown: Duration,
        timeout: Duration,
        critical_section: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce(Arc<GuardLease>) -> Fut,
        Fut: Future<Output = T>,
    {
        let holder = self.id_provider.generate_id();
        let acquired_at = self.acquire(key, &holder, timeout).await?;
        let lease = Arc::new(GuardLease::new(
            key,
            acquired_at,
            acquired_at + millis(timeout),
        ));
        debug!(guard_key = %key, acquired_at = %acquired_at, "Guard acquired");

        let output = critical_section(Arc::clone(&lease)).await;

        self.release(&lease, &holder, cooldown, timeout).await;
        Ok(output)
    }

    async fn acquire(&self, key: &str, holder: &str, timeout: Duration) -> Result<i64, GuardError> {
        // Second round covers an entry expiring between the set and the expiry read
        for _ in 0..2 {
            let now = self.time_provider.now_millis();
            if self.store.set_if_absent(key, holder, timeout).await? {
                return Ok(now);
            }
            if let Some(timeout_at) = self.store.expiry(key).await? {
                debug!(guard_key = %key, timeout_at = %timeout_at, "Guard is locked");
                return Err(GuardError::Locked {
                    key: key.to_string(),
                    timeout_at,
                });
            }
        }

        Err(GuardError::Locked {
            key: key.to_string(),
            timeout_at: self.time_provider.now_millis(),
        })
    }

    /// Re-arm the entry for the rest of the cooldown window, or drop it.
    ///
    /// Failures are logged only: the entry expires on its own at the timeout.
    async fn release(&self, lease: &GuardLease, holder: &str, cooldown: Duration, timeout: Duration) {
        let key = lease.key();
        let now = self.time_provider.now_millis();
        let acquired_at = lease.acquired_at();

        let reserved_until = (acquired_at + millis(cooldown)).min(acquired_at + millis(timeout));
        let reserved_until = lease
            .held_until()
            .map_or(reserved_until, |held| held.max(reserved_until));

        let released = if reserved_until > now {
            let rest = Duration::from_millis((reserved_until - now) as u64);
            self.store.renew(key, holder, rest).await
        } else {
            self.store.delete(key, holder).await
        };

        match released {
            Ok(true) => debug!(guard_key = %key, reserved_until = %reserved_until, "Guard released"),
            Ok(false) => warn!(guard_key = %key, "Guard entry expired before release"),
            Err(e) => warn!(guard_key = %key, error = %e, "Failed to release guard"),
        }
    }
}

fn millis(d: Duration) -> i64 {
    d.as_millis() as i64
}

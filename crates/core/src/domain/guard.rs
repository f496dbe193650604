// Guard lease handed to a critical section

use std::sync::Mutex;

/// A held guard lock.
///
/// Handed to the critical section run by `Guard::with_lock`. The section may
/// ask to keep the key reserved past the cooldown window, e.g. when the
/// remote resource answered with a rate limit.
#[derive(Debug)]
pub struct GuardLease {
    key: String,
    acquired_at: i64,
    expires_at: i64,
    hold_until: Mutex<Option<i64>>,
}

impl GuardLease {
    pub fn new(key: impl Into<String>, acquired_at: i64, expires_at: i64) -> Self {
        Self {
            key: key.into(),
            acquired_at,
            expires_at,
            hold_until: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Epoch ms at which the lock was acquired
    pub fn acquired_at(&self) -> i64 {
        self.acquired_at
    }

    /// Epoch ms at which the lock entry expires unless released earlier
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Keep the key reserved until `until_millis` after release.
    ///
    /// Later calls only ever extend the reservation.
    pub fn hold_until(&self, until_millis: i64) {
        let mut held = match self.hold_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *held = Some(held.map_or(until_millis, |current| current.max(until_millis)));
    }

    pub fn held_until(&self) -> Option<i64> {
        match self.hold_until.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

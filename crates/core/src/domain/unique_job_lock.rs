// Unique Job Lock - at most one admitted poll job per pollable

use crate::domain::digest::sha256_hex;
use crate::domain::meta_data::MetaDataId;
use crate::domain::polling_frequency::add_months;
use serde::{Deserialize, Serialize};

/// Job kind hashed into the lock digest of poll jobs
pub const POLL_JOB_KIND: &str = "PollJob";

/// Uniqueness record of one logical poll job attempt.
///
/// `expires_at` is a safety net against leaked rows (one month), not a flow
/// control mechanism. Rows sharing a `guard_key_digest` are the contenders
/// for the same guarded resource; their `(created_at, id)` order is the
/// fairness order used to stagger guard retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueJobLock {
    /// Row ID; zero until persisted
    pub id: i64,
    pub lock_digest: String,
    pub guard_key_digest: Option<String>,
    pub job_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

impl UniqueJobLock {
    pub fn new(
        lock_digest: impl Into<String>,
        guard_key_digest: Option<String>,
        job_id: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: 0,
            lock_digest: lock_digest.into(),
            guard_key_digest,
            job_id: job_id.into(),
            expires_at: add_months(now_millis, 1),
            created_at: now_millis,
        }
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }

    /// Created at or before `other` (ties broken by insertion order)
    pub fn is_ahead_of_or_equal(&self, other: &UniqueJobLock) -> bool {
        (self.created_at, self.id) <= (other.created_at, other.id)
    }
}

/// Digest identifying one logical job: `hash(job_kind, metadata_id)`
pub fn lock_digest(job_kind: &str, metadata_id: MetaDataId) -> String {
    sha256_hex(format!("{job_kind}:{metadata_id}"))
}

/// Digest of a resolved guard key
pub fn guard_key_digest(guard_key: &str) -> String {
    sha256_hex(format!("guard-key:{guard_key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[test]
    fn test_lock_digest_is_per_kind_and_id() {
        assert_eq!(lock_digest(POLL_JOB_KIND, 1), lock_digest(POLL_JOB_KIND, 1));
        assert_ne!(lock_digest(POLL_JOB_KIND, 1), lock_digest(POLL_JOB_KIND, 2));
        assert_ne!(lock_digest(POLL_JOB_KIND, 1), lock_digest("OtherJob", 1));
    }

    #[test]
    fn test_guard_key_digest_is_prefixed() {
        assert_eq!(
            guard_key_digest("example.com"),
            sha256_hex("guard-key:example.com")
        );
        assert_ne!(guard_key_digest("example.com"), sha256_hex("example.com"));
    }

    #[test]
    fn test_expires_one_month_after_creation() {
        let now = 1_700_000_000_000;
        let lock = UniqueJobLock::new("digest", None, "job-1", now);
        let ttl = lock.expires_at - now;
        assert!((28 * DAY_MS..=31 * DAY_MS).contains(&ttl));
        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(lock.expires_at));
    }

    #[test]
    fn test_ordering_breaks_ties_by_id() {
        let mut first = UniqueJobLock::new("a", None, "job-a", 1_000);
        first.id = 1;
        let mut second = UniqueJobLock::new("b", None, "job-b", 1_000);
        second.id = 2;

        assert!(first.is_ahead_of_or_equal(&second));
        assert!(!second.is_ahead_of_or_equal(&first));
        assert!(second.is_ahead_of_or_equal(&second));
    }
}

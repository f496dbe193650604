// Job uniqueness - admission and fairness ranking over the lock table

use crate::domain::unique_job_lock::{guard_key_digest, lock_digest};
use crate::domain::{MetaDataId, UniqueJobLock, POLL_JOB_KIND};
use crate::error::Result;
use crate::port::{TimeProvider, UniqueJobLockRepository};
use std::sync::Arc;
use tracing::{debug, info};

/// At most one admitted poll job per meta data row
pub struct JobUniqueness {
    repo: Arc<dyn UniqueJobLockRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobUniqueness {
    pub fn new(
        repo: Arc<dyn UniqueJobLockRepository>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            repo,
            time_provider,
        }
    }

    /// Admit the first attempt of a logical job.
    ///
    /// An expired row for the same digest is purged first. Returns `false`
    /// when a live row already exists (duplicate suppressed).
    pub async fn admit(
        &self,
        metadata_id: MetaDataId,
        guard_key: Option<&str>,
        job_id: &str,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let digest = lock_digest(POLL_JOB_KIND, metadata_id);

        if self.repo.delete_expired(&digest, now).await? {
            info!(metadata_id = %metadata_id, "Purged expired uniqueness lock");
        }

        let lock = UniqueJobLock::new(digest, guard_key.map(guard_key_digest), job_id, now);
        let admitted = self.repo.try_insert(&lock).await?.is_some();
        if !admitted {
            debug!(metadata_id = %metadata_id, job_id = %job_id, "Duplicate poll job suppressed");
        }
        Ok(admitted)
    }

    /// Delete the row of a logical job (terminal outcome)
    pub async fn release(&self, metadata_id: MetaDataId) -> Result<bool> {
        self.repo
            .delete(&lock_digest(POLL_JOB_KIND, metadata_id))
            .await
    }

    /// Position of this job among the live contenders for `guard_key`.
    ///
    /// Counts the rows created at or before this job's own row; when the
    /// own row is missing, every live contender counts. Computed from a
    /// plain read, so concurrent admissions or releases may shift it.
    pub async fn rank(&self, metadata_id: MetaDataId, guard_key: &str) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let digest = lock_digest(POLL_JOB_KIND, metadata_id);
        let contenders = self
            .repo
            .find_live_by_guard_key(&guard_key_digest(guard_key), now)
            .await?;

        let rank = match contenders.iter().find(|l| l.lock_digest == digest) {
            Some(own) => contenders
                .iter()
                .filter(|l| l.is_ahead_of_or_equal(own))
                .count(),
            None => contenders.len(),
        };
        Ok(rank as i64)
    }

    /// Remove every expired row
    pub async fn purge_expired(&self) -> Result<u64> {
        let purged = self
            .repo
            .purge_expired(self.time_provider.now_millis())
            .await?;
        if purged > 0 {
            info!(purged = %purged, "Purged expired uniqueness locks");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::unique_job_lock_repository::mocks::InMemoryUniqueJobLockRepository;
    use std::time::Duration;

    fn uniqueness() -> (JobUniqueness, Arc<InMemoryUniqueJobLockRepository>, Arc<MockTimeProvider>) {
        let repo = Arc::new(InMemoryUniqueJobLockRepository::new());
        let clock = Arc::new(MockTimeProvider::new(1_700_000_000_000));
        (JobUniqueness::new(repo.clone(), clock.clone()), repo, clock)
    }

    #[tokio::test]
    async fn test_admits_once_per_meta_data() {
        let (uniqueness, repo, _) = uniqueness();
        assert!(uniqueness.admit(1, Some("api"), "job-1").await.unwrap());
        assert!(!uniqueness.admit(1, Some("api"), "job-2").await.unwrap());
        assert!(uniqueness.admit(2, Some("api"), "job-3").await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 2);

        let row = repo
            .find_by_digest(&lock_digest(POLL_JOB_KIND, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.job_id, "job-1");
    }

    #[tokio::test]
    async fn test_expired_row_is_replaced() {
        let (uniqueness, repo, clock) = uniqueness();
        uniqueness.admit(1, None, "job-1").await.unwrap();

        clock.advance(Duration::from_secs(32 * 24 * 60 * 60));
        assert!(uniqueness.admit(1, None, "job-2").await.unwrap());

        let row = repo
            .find_by_digest(&lock_digest(POLL_JOB_KIND, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.job_id, "job-2");
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_allows_readmission() {
        let (uniqueness, _, _) = uniqueness();
        uniqueness.admit(1, None, "job-1").await.unwrap();
        assert!(uniqueness.release(1).await.unwrap());
        assert!(!uniqueness.release(1).await.unwrap());
        assert!(uniqueness.admit(1, None, "job-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_rank_follows_admission_order_per_guard_key() {
        let (uniqueness, _, clock) = uniqueness();
        for id in 1..=3 {
            uniqueness.admit(id, Some("api"), &format!("job-{id}")).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }
        uniqueness.admit(4, Some("other"), "job-4").await.unwrap();

        assert_eq!(uniqueness.rank(1, "api").await.unwrap(), 1);
        assert_eq!(uniqueness.rank(2, "api").await.unwrap(), 2);
        assert_eq!(uniqueness.rank(3, "api").await.unwrap(), 3);
        assert_eq!(uniqueness.rank(4, "other").await.unwrap(), 1);

        // Not a contender itself: everyone live counts
        assert_eq!(uniqueness.rank(9, "api").await.unwrap(), 3);

        uniqueness.release(1).await.unwrap();
        assert_eq!(uniqueness.rank(3, "api").await.unwrap(), 2);
    }
}

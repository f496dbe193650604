// Crash recovery: jobs held by a worker that died are handed back to the queue
use crate::application::worker::constants::DEFAULT_RECOVERY_WINDOW_MS;
use crate::port::{JobQueue, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Crash recovery service
///
/// On daemon startup, releases jobs that were started longer ago than the
/// recovery window. Poll jobs are safe to re-run: admission already
/// happened, and the meta data row accepts `polling -> polling`.
pub struct RecoveryService {
    job_queue: Arc<dyn JobQueue>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// `recovery_window_ms` defaults to 15 minutes
    pub fn new(
        job_queue: Arc<dyn JobQueue>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window_ms: Option<i64>,
    ) -> Self {
        Self {
            job_queue,
            time_provider,
            recovery_window_ms: recovery_window_ms.unwrap_or(DEFAULT_RECOVERY_WINDOW_MS),
        }
    }

    /// Never release jobs younger than `lease`.
    ///
    /// Another process may still be polling inside a guard lease of that length.
    pub fn covering_guard_lease(mut self, lease: Duration) -> Self {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        if self.recovery_window_ms < lease_ms {
            warn!(
                configured_ms = %self.recovery_window_ms,
                guard_timeout_ms = %lease_ms,
                "Recovery window shorter than the guard timeout, widening it"
            );
            self.recovery_window_ms = lease_ms;
        }
        self
    }

    pub fn recovery_window_ms(&self) -> i64 {
        self.recovery_window_ms
    }

    /// Returns the number of jobs released
    pub async fn recover_orphaned_jobs(&self) -> crate::error::Result<u64> {
        let cutoff = self.time_provider.now_millis() - self.recovery_window_ms;
        info!(
            cutoff_time = %cutoff,
            recovery_window_ms = %self.recovery_window_ms,
            "Starting orphaned job recovery"
        );

        let recovered = self.job_queue.requeue_stale(cutoff).await?;

        info!(recovered_count = %recovered, "Orphaned job recovery complete");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::job_queue::mocks::InMemoryJobQueue;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::QueuedJob;
    use std::time::Duration;

    #[tokio::test]
    async fn test_releases_only_stale_jobs() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let clock = Arc::new(MockTimeProvider::new(0));
        for id in ["old", "fresh"] {
            let job = QueuedJob::new(id, "polling", "PollJob", serde_json::Value::Null, 0, 0);
            queue.submit(&job).await.unwrap();
        }

        queue.pop_due("polling", 0).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(10 * 60));
        queue
            .pop_due("polling", clock.now_millis())
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::from_secs(6 * 60));

        let recovery = RecoveryService::new(queue.clone(), clock.clone(), None);
        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 1);

        let released = queue.pop_due("polling", clock.now_millis()).await.unwrap().unwrap();
        assert_eq!(released.id, "old");
    }

    #[tokio::test]
    async fn test_window_covers_guard_lease() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let clock = Arc::new(MockTimeProvider::new(0));
        let job = QueuedJob::new("running", "polling", "PollJob", serde_json::Value::Null, 0, 0);
        queue.submit(&job).await.unwrap();
        queue.pop_due("polling", 0).await.unwrap().unwrap();

        // Started 8 minutes ago, still inside a 10 minute guard lease elsewhere
        clock.advance(Duration::from_secs(8 * 60));

        let recovery = RecoveryService::new(queue.clone(), clock.clone(), Some(5 * 60 * 1000))
            .covering_guard_lease(Duration::from_secs(10 * 60));
        assert_eq!(recovery.recovery_window_ms(), 10 * 60 * 1000);
        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 0);
        assert!(queue.pop_due("polling", clock.now_millis()).await.unwrap().is_none());

        clock.advance(Duration::from_secs(3 * 60));
        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 1);
    }

    #[test]
    fn test_default_window_outlasts_default_guard_timeout() {
        let recovery = RecoveryService::new(
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(MockTimeProvider::new(0)),
            None,
        )
        .covering_guard_lease(crate::domain::pollable::DEFAULT_GUARD_TIMEOUT);
        assert_eq!(recovery.recovery_window_ms(), DEFAULT_RECOVERY_WINDOW_MS);
    }
}

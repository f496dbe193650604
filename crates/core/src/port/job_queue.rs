// Job Queue Port - durable delayed job submission

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One submitted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    /// Not eligible before this time (epoch ms)
    pub run_at: i64,
    pub created_at: i64,
    /// Set while a worker holds the job
    pub started_at: Option<i64>,
}

impl QueuedJob {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        run_at: i64,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            kind: kind.into(),
            payload,
            run_at,
            created_at: now_millis,
            started_at: None,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, job: &QueuedJob) -> Result<()>;

    /// Atomically take the oldest due job of `queue` and mark it started
    async fn pop_due(&self, queue: &str, now_millis: i64) -> Result<Option<QueuedJob>>;

    /// Remove a finished job
    async fn acknowledge(&self, id: &str) -> Result<()>;

    /// Hand a started job back to the queue, eligible again at `run_at`
    async fn release(&self, id: &str, run_at: i64) -> Result<()>;

    /// Jobs of `queue`, started or not
    async fn count(&self, queue: &str) -> Result<i64>;

    /// Release jobs started before `started_before` (their worker died)
    async fn requeue_stale(&self, started_before: i64) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryJobQueue {
        jobs: Mutex<Vec<QueuedJob>>,
    }

    impl InMemoryJobQueue {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of every job, in submission order
        pub fn jobs(&self) -> Vec<QueuedJob> {
            self.jobs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobQueue for InMemoryJobQueue {
        async fn submit(&self, job: &QueuedJob) -> Result<()> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn pop_due(&self, queue: &str, now_millis: i64) -> Result<Option<QueuedJob>> {
            let mut jobs = self.jobs.lock().unwrap();
            let next = jobs
                .iter_mut()
                .filter(|j| j.queue == queue && j.started_at.is_none() && j.run_at <= now_millis)
                .min_by_key(|j| (j.run_at, j.created_at));
            Ok(next.map(|job| {
                job.started_at = Some(now_millis);
                job.clone()
            }))
        }

        async fn acknowledge(&self, id: &str) -> Result<()> {
            self.jobs.lock().unwrap().retain(|j| j.id != id);
            Ok(())
        }

        async fn release(&self, id: &str, run_at: i64) -> Result<()> {
            for job in self.jobs.lock().unwrap().iter_mut().filter(|j| j.id == id) {
                job.started_at = None;
                job.run_at = run_at;
            }
            Ok(())
        }

        async fn count(&self, queue: &str) -> Result<i64> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.queue == queue)
                .count() as i64)
        }

        async fn requeue_stale(&self, started_before: i64) -> Result<u64> {
            let mut released = 0;
            for job in self.jobs.lock().unwrap().iter_mut() {
                if job.started_at.is_some_and(|s| s < started_before) {
                    job.started_at = None;
                    released += 1;
                }
            }
            Ok(released)
        }
    }
}

// Poll job submission

use super::{JobUniqueness, PollJobArgs};
use crate::application::registry::PollableRegistry;
use crate::domain::{PollableMetaData, POLL_JOB_KIND};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobQueue, QueuedJob, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Submits poll jobs to the queue, enforcing uniqueness on first attempts
pub struct PollJobClient {
    queue: Arc<dyn JobQueue>,
    uniqueness: Arc<JobUniqueness>,
    registry: Arc<PollableRegistry>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PollJobClient {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        uniqueness: Arc<JobUniqueness>,
        registry: Arc<PollableRegistry>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue,
            uniqueness,
            registry,
            id_provider,
            time_provider,
        }
    }

    /// Submit the first attempt of a poll job for `meta`.
    ///
    /// Returns the logical job id, or `None` when another attempt for the
    /// same row is still live.
    pub async fn enqueue(&self, meta: &PollableMetaData) -> Result<Option<String>> {
        let kind = self
            .registry
            .get(&meta.pollable.pollable_type)
            .ok_or_else(|| AppError::NotFound(format!("pollable kind {}", meta.pollable.pollable_type)))?;

        // A vanished entity is admitted without guard key; the job deactivates it
        let guard_key = kind
            .load(meta.pollable.pollable_id)
            .await?
            .map(|p| p.guard_key());

        let job_id = self.id_provider.generate_id();
        if !self
            .uniqueness
            .admit(meta.id, guard_key.as_deref(), &job_id)
            .await?
        {
            return Ok(None);
        }

        let args = PollJobArgs::first(meta.id, job_id.clone());
        if let Err(e) = self.submit(&args, kind.queue(), 0).await {
            // Not submitted, so nothing would ever release the row
            if let Err(release_err) = self.uniqueness.release(meta.id).await {
                warn!(metadata_id = %meta.id, error = %release_err, "Failed to release uniqueness lock");
            }
            return Err(e);
        }

        info!(
            metadata_id = %meta.id,
            pollable = %meta.pollable,
            job_id = %job_id,
            queue = %kind.queue(),
            "Poll job enqueued"
        );
        Ok(Some(job_id))
    }

    /// Re-submit an admitted job after `delay_ms`; skips admission
    pub async fn resubmit(&self, args: &PollJobArgs, queue: &str, delay_ms: i64) -> Result<()> {
        self.submit(args, queue, delay_ms).await?;
        debug!(
            metadata_id = %args.metadata_id,
            attempt = %args.attempt,
            delay_ms = %delay_ms,
            "Poll job re-submitted"
        );
        Ok(())
    }

    async fn submit(&self, args: &PollJobArgs, queue: &str, delay_ms: i64) -> Result<()> {
        let now = self.time_provider.now_millis();
        let job = QueuedJob::new(
            self.id_provider.generate_id(),
            queue,
            POLL_JOB_KIND,
            serde_json::to_value(args)?,
            now + delay_ms.max(0),
            now,
        );
        self.queue.submit(&job).await
    }
}

//! Scheduler - periodic sweep turning due pollables into poll jobs
//!
//! Each tick walks the waiting rows whose `next_polling` has passed, in id
//! order and in bounded batches, moves each one to `enqueued` and submits
//! its first poll job. The conditional `waiting -> enqueued` update keeps
//! concurrent ticks from emitting twice for the same row.

use crate::application::poll_job::PollJobClient;
use crate::application::registry::PollableRegistry;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{PollableMetaDataRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Counters of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub enqueued: usize,
    /// Admission refused: an attempt for the row is still live
    pub suppressed: usize,
    /// No kind registered, or another tick took the row first
    pub skipped: usize,
    pub failed: usize,
}

pub struct Scheduler {
    meta_repo: Arc<dyn PollableMetaDataRepository>,
    registry: Arc<PollableRegistry>,
    client: Arc<PollJobClient>,
    time_provider: Arc<dyn TimeProvider>,
    batch_size: usize,
}

impl Scheduler {
    pub fn new(
        meta_repo: Arc<dyn PollableMetaDataRepository>,
        registry: Arc<PollableRegistry>,
        client: Arc<PollJobClient>,
        time_provider: Arc<dyn TimeProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            meta_repo,
            registry,
            client,
            time_provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Enqueue a poll job for every due pollable
    pub async fn enqueue_due_pollables(&self) -> Result<TickSummary> {
        let now = self.time_provider.now_millis();
        let mut summary = TickSummary::default();
        let mut after_id = 0;

        loop {
            let batch = self
                .meta_repo
                .find_due(now, after_id, self.batch_size)
                .await?;
            let exhausted = batch.len() < self.batch_size;

            for meta in batch {
                after_id = meta.id;

                if self.registry.get(&meta.pollable.pollable_type).is_none() {
                    warn!(
                        metadata_id = %meta.id,
                        pollable = %meta.pollable,
                        "No pollable kind registered, leaving row waiting"
                    );
                    summary.skipped += 1;
                    continue;
                }

                if !self.meta_repo.mark_enqueued(meta.id, now).await? {
                    debug!(metadata_id = %meta.id, "Row no longer waiting, skipped");
                    summary.skipped += 1;
                    continue;
                }

                match self.client.enqueue(&meta).await {
                    Ok(Some(_)) => summary.enqueued += 1,
                    Ok(None) => summary.suppressed += 1,
                    Err(e) => {
                        // The row stays enqueued without a job (at-least-once emission)
                        error!(metadata_id = %meta.id, error = %e, "Failed to enqueue poll job");
                        summary.failed += 1;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        if summary != TickSummary::default() {
            info!(
                enqueued = summary.enqueued,
                suppressed = summary.suppressed,
                skipped = summary.skipped,
                failed = summary.failed,
                "Scheduler tick finished"
            );
        }
        Ok(summary)
    }

    /// Tick every `interval` until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken, interval: Duration) -> Result<()> {
        info!(interval_ms = interval.as_millis() as u64, "Scheduler started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.enqueue_due_pollables().await {
                error!(error = %e, "Scheduler tick failed");
            }
            tokio::select! {
                _ = sleep(interval) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

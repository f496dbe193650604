// Poll job execution

use super::{JobUniqueness, PollJobArgs, PollJobClient, PollJobOutcome};
use crate::application::guard::{Guard, GuardError};
use crate::application::registry::{FailureClass, LoadedPollable, PollableRegistry};
use crate::application::retry::{BackoffPolicy, RetryDecision};
use crate::application::worker::constants::{BLOCKING_GUARD_RETRY_DELAY_MS, STAGGER_MAX_JITTER_MS};
use crate::domain::{MetaDataId, PollState, PollableMetaData};
use crate::error::Result;
use crate::port::{PollError, PollableMetaDataRepository, QueuedJob, TimeProvider};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Error kind reported when the guard's keyed store fails
pub const GUARD_STORE_ERROR_KIND: &str = "guard_store";

/// Runs one poll job: load, guard, poll, then complete, retry or deactivate
pub struct PollJobRunner {
    meta_repo: Arc<dyn PollableMetaDataRepository>,
    registry: Arc<PollableRegistry>,
    guard: Arc<Guard>,
    uniqueness: Arc<JobUniqueness>,
    client: Arc<PollJobClient>,
    backoff: BackoffPolicy,
    time_provider: Arc<dyn TimeProvider>,
}

impl PollJobRunner {
    pub fn new(
        meta_repo: Arc<dyn PollableMetaDataRepository>,
        registry: Arc<PollableRegistry>,
        guard: Arc<Guard>,
        uniqueness: Arc<JobUniqueness>,
        client: Arc<PollJobClient>,
        backoff: BackoffPolicy,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            meta_repo,
            registry,
            guard,
            uniqueness,
            client,
            backoff,
            time_provider,
        }
    }

    pub async fn perform(&self, job: &QueuedJob) -> Result<PollJobOutcome> {
        let args: PollJobArgs = serde_json::from_value(job.payload.clone())?;

        let Some(mut meta) = self.meta_repo.find_by_id(args.metadata_id).await? else {
            warn!(metadata_id = %args.metadata_id, "PollableMetaData not found, dropping poll job");
            self.uniqueness.release(args.metadata_id).await?;
            return Ok(PollJobOutcome::MetaDataMissing);
        };

        if meta.is_deactivated() {
            info!(metadata_id = %meta.id, pollable = %meta.pollable, "Pollable is deactivated, skipping poll");
            self.uniqueness.release(meta.id).await?;
            return Ok(PollJobOutcome::Skipped);
        }

        let Some(kind) = self.registry.get(&meta.pollable.pollable_type) else {
            error!(metadata_id = %meta.id, pollable = %meta.pollable, "No pollable kind registered");
            self.uniqueness.release(meta.id).await?;
            return Ok(PollJobOutcome::UnknownKind);
        };

        let Some(pollable) = kind.load(meta.pollable.pollable_id).await? else {
            warn!(metadata_id = %meta.id, pollable = %meta.pollable, "Pollable no longer exists, deactivating");
            let reason = format!("Pollable {} no longer exists", meta.pollable);
            meta.disable(self.time_provider.now_millis(), reason)?;
            if !self.meta_repo.update_if_active(&meta).await? {
                return self.deactivated_meanwhile(meta.id).await;
            }
            self.uniqueness.release(meta.id).await?;
            return Ok(PollJobOutcome::PollableMissing);
        };
        let pollable = pollable.as_ref();

        let now = self.time_provider.now_millis();
        // Submitted outside a scheduler tick
        if meta.state == PollState::Waiting {
            meta.enqueue(now)?;
        }
        meta.start(now)?;
        if !self.meta_repo.update_if_active(&meta).await? {
            return self.deactivated_meanwhile(meta.id).await;
        }
        pollable.run_before_hooks();

        let guard_key = pollable.guard_key();
        let result = self
            .guard
            .with_lock(
                &guard_key,
                pollable.guard_cooldown(),
                pollable.guard_timeout(),
                |lease| async move { pollable.poll(&lease).await },
            )
            .await;

        match result {
            Ok(Ok(())) => self.on_success(meta, pollable).await,
            Ok(Err(poll_error)) => {
                self.on_failure(meta, pollable, &args, &job.queue, poll_error)
                    .await
            }
            Err(GuardError::Locked { key, timeout_at }) => {
                self.on_guard_locked(meta, pollable, &args, &job.queue, &key, timeout_at)
                    .await
            }
            Err(GuardError::Store(e)) => {
                let poll_error = PollError::new(GUARD_STORE_ERROR_KIND, e.to_string());
                self.on_failure(meta, pollable, &args, &job.queue, poll_error)
                    .await
            }
        }
    }

    /// Treat a panicked run of `job` as a generic failure
    pub async fn recover_from_panic(&self, job: &QueuedJob, message: &str) -> Result<PollJobOutcome> {
        let args: PollJobArgs = serde_json::from_value(job.payload.clone())?;

        let meta = match self.meta_repo.find_by_id(args.metadata_id).await? {
            Some(meta) if !meta.is_deactivated() => meta,
            _ => {
                self.uniqueness.release(args.metadata_id).await?;
                return Ok(PollJobOutcome::Skipped);
            }
        };

        error!(
            metadata_id = %meta.id,
            attempt = %args.attempt,
            panic = %message,
            "Poll job panicked"
        );
        self.retry_or_exhaust(meta, &args, &job.queue, message).await
    }

    /// Deactivate after the retry budget is used up and release the job's lock
    pub async fn exhaust(&self, metadata_id: MetaDataId, message: &str) -> Result<()> {
        if let Some(mut meta) = self.meta_repo.find_by_id(metadata_id).await? {
            if !meta.is_deactivated() {
                let reason = format!(
                    "Polling failed {} times, last error: {}",
                    self.backoff.max_attempts(),
                    message
                );
                meta.disable(self.time_provider.now_millis(), reason)?;
                if !self.meta_repo.update_if_active(&meta).await? {
                    info!(metadata_id = %metadata_id, "Pollable deactivated meanwhile, keeping its reason");
                }
            }
        }
        self.uniqueness.release(metadata_id).await?;

        error!(metadata_id = %metadata_id, error = %message, "Retries exhausted, pollable deactivated");
        Ok(())
    }

    /// The row was deactivated (or removed) while the job ran: drop the job
    async fn deactivated_meanwhile(&self, metadata_id: MetaDataId) -> Result<PollJobOutcome> {
        info!(metadata_id = %metadata_id, "Pollable deactivated while polling, dropping poll job");
        self.uniqueness.release(metadata_id).await?;
        Ok(PollJobOutcome::Skipped)
    }

    async fn on_success(
        &self,
        mut meta: PollableMetaData,
        pollable: &dyn LoadedPollable,
    ) -> Result<PollJobOutcome> {
        let now = self.time_provider.now_millis();
        meta.complete(now, pollable.next_polling(now))?;
        if !self.meta_repo.update_if_active(&meta).await? {
            return self.deactivated_meanwhile(meta.id).await;
        }
        pollable.run_after_hooks();
        self.uniqueness.release(meta.id).await?;

        info!(
            metadata_id = %meta.id,
            pollable = %meta.pollable,
            next_polling = %meta.next_polling,
            "Poll completed"
        );
        Ok(PollJobOutcome::Completed)
    }

    async fn on_failure(
        &self,
        mut meta: PollableMetaData,
        pollable: &dyn LoadedPollable,
        args: &PollJobArgs,
        queue: &str,
        poll_error: PollError,
    ) -> Result<PollJobOutcome> {
        match pollable.classify(&poll_error) {
            FailureClass::Deactivation => {
                warn!(
                    metadata_id = %meta.id,
                    pollable = %meta.pollable,
                    error = %poll_error,
                    "Deactivation error raised, deactivating pollable"
                );
                meta.disable(self.time_provider.now_millis(), poll_error.to_string())?;
                if !self.meta_repo.update_if_active(&meta).await? {
                    return self.deactivated_meanwhile(meta.id).await;
                }
                self.uniqueness.release(meta.id).await?;
                Ok(PollJobOutcome::Deactivated)
            }
            FailureClass::Ignored => {
                warn!(
                    metadata_id = %meta.id,
                    attempt = %args.attempt,
                    error = %poll_error,
                    ignored = true,
                    "Poll failed"
                );
                self.retry_or_exhaust(meta, args, queue, &poll_error.message)
                    .await
            }
            FailureClass::Standard => {
                error!(
                    metadata_id = %meta.id,
                    attempt = %args.attempt,
                    error = %poll_error,
                    "Poll failed"
                );
                self.retry_or_exhaust(meta, args, queue, &poll_error.message)
                    .await
            }
        }
    }

    async fn retry_or_exhaust(
        &self,
        mut meta: PollableMetaData,
        args: &PollJobArgs,
        queue: &str,
        message: &str,
    ) -> Result<PollJobOutcome> {
        match self.backoff.decide(args.attempt) {
            RetryDecision::Retry(delay_ms) => {
                meta.enqueue(self.time_provider.now_millis())?;
                if !self.meta_repo.update_if_active(&meta).await? {
                    return self.deactivated_meanwhile(meta.id).await;
                }

                let next = args.next_attempt();
                self.client.resubmit(&next, queue, delay_ms).await?;
                Ok(PollJobOutcome::RetryScheduled {
                    attempt: next.attempt,
                    delay_ms,
                })
            }
            RetryDecision::Exhausted => {
                self.exhaust(meta.id, message).await?;
                Ok(PollJobOutcome::Exhausted)
            }
        }
    }

    async fn on_guard_locked(
        &self,
        mut meta: PollableMetaData,
        pollable: &dyn LoadedPollable,
        args: &PollJobArgs,
        queue: &str,
        guard_key: &str,
        timeout_at: i64,
    ) -> Result<PollJobOutcome> {
        let now = self.time_provider.now_millis();
        meta.enqueue(now)?;
        if !self.meta_repo.update_if_active(&meta).await? {
            return self.deactivated_meanwhile(meta.id).await;
        }

        if pollable.sleep_on_guard_locked() {
            let wait_ms = (timeout_at - now).max(0);
            info!(
                metadata_id = %meta.id,
                guard_key = %guard_key,
                wait_ms = %wait_ms,
                "Guard locked, sleeping until it frees up"
            );
            sleep(Duration::from_millis(wait_ms as u64)).await;
            self.client
                .resubmit(args, queue, BLOCKING_GUARD_RETRY_DELAY_MS)
                .await?;
            return Ok(PollJobOutcome::GuardContended {
                delay_ms: BLOCKING_GUARD_RETRY_DELAY_MS,
            });
        }

        let rank = self.uniqueness.rank(meta.id, guard_key).await?;
        let cooldown_ms = pollable.guard_cooldown().as_millis() as i64;
        let jitter_ms = rand::thread_rng().gen_range(0..=STAGGER_MAX_JITTER_MS);
        let delay_ms = stagger_delay(timeout_at - now, rank, cooldown_ms, jitter_ms);

        info!(
            metadata_id = %meta.id,
            guard_key = %guard_key,
            rank = %rank,
            delay_ms = %delay_ms,
            "Guard locked, staggering retry"
        );
        self.client.resubmit(args, queue, delay_ms).await?;
        Ok(PollJobOutcome::GuardContended { delay_ms })
    }
}

/// `base + rank * cooldown + jitter`; just the jitter when nothing is left to wait
pub fn stagger_delay(base_ms: i64, rank: i64, cooldown_ms: i64, jitter_ms: i64) -> i64 {
    let delay = base_ms.max(0) + rank * cooldown_ms;
    if delay > 0 {
        delay + jitter_ms
    } else {
        jitter_ms
    }
}

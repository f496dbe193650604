// Worker - poll job execution loop

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::panic_message;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::poll_job::PollJobRunner;
use crate::domain::POLL_JOB_KIND;
use crate::error::Result;
use crate::port::{JobQueue, TimeProvider};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Worker pulls poll jobs from one queue
pub struct Worker {
    queue: String,
    job_queue: Arc<dyn JobQueue>,
    runner: Arc<PollJobRunner>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        job_queue: Arc<dyn JobQueue>,
        runner: Arc<PollJobRunner>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue: queue.into(),
            job_queue,
            runner,
            time_provider,
        }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!("Worker started for queue: {}", self.queue);
        loop {
            if shutdown.is_shutdown() {
                info!("Worker shutting down for queue: {}", self.queue);
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Worker error: {}", e);
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!("Worker stopped for queue: {}", self.queue);
        Ok(())
    }

    /// Process next due job (returns true if a job was taken)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let job = match self.job_queue.pop_due(&self.queue, now).await? {
            Some(j) => j,
            None => return Ok(false),
        };

        if job.kind != POLL_JOB_KIND {
            warn!(job_id = %job.id, kind = %job.kind, "Unknown job kind, discarding");
            self.job_queue.acknowledge(&job.id).await?;
            return Ok(true);
        }

        // A panicking poll must not take the worker down
        let runner = Arc::clone(&self.runner);
        let job_for_exec = job.clone();
        let handle = tokio::task::spawn(async move { runner.perform(&job_for_exec).await });

        match handle.await {
            Ok(Ok(outcome)) => {
                debug!(job_id = %job.id, outcome = ?outcome, "Poll job finished");
                self.job_queue.acknowledge(&job.id).await?;
            }
            Ok(Err(e)) => {
                let run_at = self.time_provider.now_millis() + INFRA_ERROR_RETRY_DELAY_MS;
                error!(job_id = %job.id, error = %e, "Poll job failed, releasing it for a later run");
                self.job_queue.release(&job.id, run_at).await?;
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "poll job cancelled".to_string()
                };
                match self.runner.recover_from_panic(&job, &message).await {
                    Ok(outcome) => debug!(job_id = %job.id, outcome = ?outcome, "Recovered from panic"),
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to recover from panic"),
                }
                self.job_queue.acknowledge(&job.id).await?;
            }
        }
        Ok(true)
    }
}

// Pollable lifecycle operations outside the poll loop

use crate::domain::{PollableMetaData, PollableRef};
use crate::error::{AppError, Result};
use crate::port::{PollableMetaDataRepository, TimeProvider};
use std::sync::Arc;
use tracing::info;

pub struct PollableService {
    meta_repo: Arc<dyn PollableMetaDataRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PollableService {
    pub fn new(
        meta_repo: Arc<dyn PollableMetaDataRepository>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            meta_repo,
            time_provider,
        }
    }

    /// Create the meta data row of a new pollable (due immediately).
    ///
    /// Idempotent: an existing row is returned unchanged.
    pub async fn register(&self, pollable: &PollableRef) -> Result<PollableMetaData> {
        if let Some(existing) = self.meta_repo.find_by_pollable(pollable).await? {
            return Ok(existing);
        }
        match self
            .meta_repo
            .insert(pollable, self.time_provider.now_millis())
            .await
        {
            Ok(meta) => {
                info!(metadata_id = %meta.id, pollable = %pollable, "Pollable registered");
                Ok(meta)
            }
            // Registered concurrently
            Err(e) if e.is_conflict() => self
                .meta_repo
                .find_by_pollable(pollable)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("meta data for {pollable}"))),
            Err(e) => Err(e),
        }
    }

    pub async fn find(&self, pollable: &PollableRef) -> Result<Option<PollableMetaData>> {
        self.meta_repo.find_by_pollable(pollable).await
    }

    /// Permanently stop polling `pollable`
    pub async fn deactivate(&self, pollable: &PollableRef, reason: &str) -> Result<PollableMetaData> {
        let mut meta = self
            .meta_repo
            .find_by_pollable(pollable)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("meta data for {pollable}")))?;

        meta.disable(self.time_provider.now_millis(), reason)?;
        self.meta_repo.update(&meta).await?;

        info!(metadata_id = %meta.id, pollable = %pollable, reason = %reason, "Pollable deactivated");
        Ok(meta)
    }
}

// Pollable Meta Data Repository Port (Interface)

use crate::domain::{MetaDataId, PollState, PollableMetaData, PollableRef};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence of polling state, one row per pollable
#[async_trait]
pub trait PollableMetaDataRepository: Send + Sync {
    /// Insert a fresh `waiting` row (due immediately).
    ///
    /// Returns `AppError::Conflict` when the pollable already has a row.
    async fn insert(&self, pollable: &PollableRef, now_millis: i64) -> Result<PollableMetaData>;

    async fn find_by_id(&self, id: MetaDataId) -> Result<Option<PollableMetaData>>;

    async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Option<PollableMetaData>>;

    /// Persist state, timestamps and deactivation fields of `meta`
    async fn update(&self, meta: &PollableMetaData) -> Result<()>;

    /// Like `update`, but leaves a row deactivated in the meantime untouched.
    ///
    /// `false` when the stored row is deactivated or gone.
    async fn update_if_active(&self, meta: &PollableMetaData) -> Result<bool>;

    /// Waiting rows with `next_polling <= now`, ordered by id, starting after `after_id`
    async fn find_due(
        &self,
        now_millis: i64,
        after_id: MetaDataId,
        limit: usize,
    ) -> Result<Vec<PollableMetaData>>;

    /// Conditional `waiting -> enqueued`; `false` when the row was no longer waiting
    async fn mark_enqueued(&self, id: MetaDataId, now_millis: i64) -> Result<bool>;

    async fn find_by_state(&self, state: PollState, limit: usize) -> Result<Vec<PollableMetaData>>;

    /// Row count per state (states without rows are omitted)
    async fn count_by_state(&self) -> Result<Vec<(PollState, i64)>>;

    async fn delete(&self, id: MetaDataId) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory meta data repository
    #[derive(Default)]
    pub struct InMemoryMetaDataRepository {
        rows: Mutex<BTreeMap<MetaDataId, PollableMetaData>>,
    }

    impl InMemoryMetaDataRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PollableMetaDataRepository for InMemoryMetaDataRepository {
        async fn insert(&self, pollable: &PollableRef, now_millis: i64) -> Result<PollableMetaData> {
            let mut rows = self.rows.lock().unwrap();
            if rows.values().any(|m| &m.pollable == pollable) {
                return Err(AppError::Conflict(format!("meta data for {pollable}")));
            }
            let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
            let meta = PollableMetaData::new(id, pollable.clone(), now_millis);
            rows.insert(id, meta.clone());
            Ok(meta)
        }

        async fn find_by_id(&self, id: MetaDataId) -> Result<Option<PollableMetaData>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Option<PollableMetaData>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|m| &m.pollable == pollable)
                .cloned())
        }

        async fn update(&self, meta: &PollableMetaData) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&meta.id) {
                Some(row) => {
                    *row = meta.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("meta data {}", meta.id))),
            }
        }

        async fn update_if_active(&self, meta: &PollableMetaData) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&meta.id) {
                Some(row) if !row.is_deactivated() => {
                    *row = meta.clone();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn find_due(
            &self,
            now_millis: i64,
            after_id: MetaDataId,
            limit: usize,
        ) -> Result<Vec<PollableMetaData>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .range(after_id + 1..)
                .map(|(_, m)| m)
                .filter(|m| m.is_due(now_millis))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn mark_enqueued(&self, id: MetaDataId, now_millis: i64) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&id) {
                Some(row) if row.state == PollState::Waiting => {
                    row.enqueue(now_millis)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn find_by_state(&self, state: PollState, limit: usize) -> Result<Vec<PollableMetaData>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|m| m.state == state)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn count_by_state(&self) -> Result<Vec<(PollState, i64)>> {
            let rows = self.rows.lock().unwrap();
            let mut counts: Vec<(PollState, i64)> = Vec::new();
            for meta in rows.values() {
                match counts.iter_mut().find(|(s, _)| *s == meta.state) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((meta.state, 1)),
                }
            }
            Ok(counts)
        }

        async fn delete(&self, id: MetaDataId) -> Result<bool> {
            Ok(self.rows.lock().unwrap().remove(&id).is_some())
        }
    }
}

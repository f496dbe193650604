// Unique Job Lock Repository Port (Interface)

use crate::domain::UniqueJobLock;
use crate::error::Result;
use async_trait::async_trait;

/// Persistence of job uniqueness rows.
///
/// `lock_digest` is unique at the storage level; that constraint is what
/// makes admission race-free across processes.
#[async_trait]
pub trait UniqueJobLockRepository: Send + Sync {
    /// Delete the row for `lock_digest` if it has expired at `now_millis`
    async fn delete_expired(&self, lock_digest: &str, now_millis: i64) -> Result<bool>;

    /// Insert `lock`; `None` when the digest is taken, the persisted row otherwise
    async fn try_insert(&self, lock: &UniqueJobLock) -> Result<Option<UniqueJobLock>>;

    async fn find_by_digest(&self, lock_digest: &str) -> Result<Option<UniqueJobLock>>;

    async fn delete(&self, lock_digest: &str) -> Result<bool>;

    /// Live rows sharing a guard key, ordered by `(created_at, id)`
    async fn find_live_by_guard_key(
        &self,
        guard_key_digest: &str,
        now_millis: i64,
    ) -> Result<Vec<UniqueJobLock>>;

    /// Delete every expired row; returns the number removed
    async fn purge_expired(&self, now_millis: i64) -> Result<u64>;

    async fn count(&self) -> Result<i64>;

    /// Rows ordered by `(created_at, id)`
    async fn list(&self, limit: usize) -> Result<Vec<UniqueJobLock>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// In-memory lock table
    #[derive(Default)]
    pub struct InMemoryUniqueJobLockRepository {
        rows: Mutex<Vec<UniqueJobLock>>,
        next_id: Mutex<i64>,
    }

    impl InMemoryUniqueJobLockRepository {
        pub fn new() -> Self {
            Self::default()
        }

        fn sorted(mut rows: Vec<UniqueJobLock>) -> Vec<UniqueJobLock> {
            rows.sort_by_key(|l| (l.created_at, l.id));
            rows
        }
    }

    #[async_trait]
    impl UniqueJobLockRepository for InMemoryUniqueJobLockRepository {
        async fn delete_expired(&self, lock_digest: &str, now_millis: i64) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|l| !(l.lock_digest == lock_digest && l.is_expired(now_millis)));
            Ok(rows.len() != before)
        }

        async fn try_insert(&self, lock: &UniqueJobLock) -> Result<Option<UniqueJobLock>> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|l| l.lock_digest == lock.lock_digest) {
                return Ok(None);
            }
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let mut stored = lock.clone();
            stored.id = *next_id;
            rows.push(stored.clone());
            Ok(Some(stored))
        }

        async fn find_by_digest(&self, lock_digest: &str) -> Result<Option<UniqueJobLock>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|l| l.lock_digest == lock_digest)
                .cloned())
        }

        async fn delete(&self, lock_digest: &str) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|l| l.lock_digest != lock_digest);
            Ok(rows.len() != before)
        }

        async fn find_live_by_guard_key(
            &self,
            guard_key_digest: &str,
            now_millis: i64,
        ) -> Result<Vec<UniqueJobLock>> {
            let rows = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.guard_key_digest.as_deref() == Some(guard_key_digest))
                .filter(|l| !l.is_expired(now_millis))
                .cloned()
                .collect();
            Ok(Self::sorted(rows))
        }

        async fn purge_expired(&self, now_millis: i64) -> Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|l| !l.is_expired(now_millis));
            Ok((before - rows.len()) as u64)
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.rows.lock().unwrap().len() as i64)
        }

        async fn list(&self, limit: usize) -> Result<Vec<UniqueJobLock>> {
            let rows = self.rows.lock().unwrap().clone();
            Ok(Self::sorted(rows).into_iter().take(limit).collect())
        }
    }
}

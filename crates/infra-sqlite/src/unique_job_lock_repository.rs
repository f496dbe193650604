// SQLite UniqueJobLockRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use perennial_core::domain::UniqueJobLock;
use perennial_core::error::Result;
use perennial_core::port::UniqueJobLockRepository;
use sqlx::SqlitePool;

pub struct SqliteUniqueJobLockRepository {
    pool: SqlitePool,
}

impl SqliteUniqueJobLockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UniqueJobLockRepository for SqliteUniqueJobLockRepository {
    async fn delete_expired(&self, lock_digest: &str, now_millis: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM unique_job_locks WHERE lock_digest = ? AND expires_at <= ?")
                .bind(lock_digest)
                .bind(now_millis)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_insert(&self, lock: &UniqueJobLock) -> Result<Option<UniqueJobLock>> {
        // The UNIQUE(lock_digest) constraint is the admission decision
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO unique_job_locks (lock_digest, guard_key_digest, job_id, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(lock_digest) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&lock.lock_digest)
        .bind(&lock.guard_key_digest)
        .bind(&lock.job_id)
        .bind(lock.expires_at)
        .bind(lock.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id.map(|id| UniqueJobLock {
            id,
            ..lock.clone()
        }))
    }

    async fn find_by_digest(&self, lock_digest: &str) -> Result<Option<UniqueJobLock>> {
        let row = sqlx::query_as::<_, LockRow>("SELECT * FROM unique_job_locks WHERE lock_digest = ?")
            .bind(lock_digest)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(UniqueJobLock::from))
    }

    async fn delete(&self, lock_digest: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM unique_job_locks WHERE lock_digest = ?")
            .bind(lock_digest)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_live_by_guard_key(
        &self,
        guard_key_digest: &str,
        now_millis: i64,
    ) -> Result<Vec<UniqueJobLock>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            r#"
            SELECT * FROM unique_job_locks
            WHERE guard_key_digest = ? AND expires_at > ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(guard_key_digest)
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UniqueJobLock::from).collect())
    }

    async fn purge_expired(&self, now_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM unique_job_locks WHERE expires_at <= ?")
            .bind(now_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM unique_job_locks")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn list(&self, limit: usize) -> Result<Vec<UniqueJobLock>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT * FROM unique_job_locks ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UniqueJobLock::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    id: i64,
    lock_digest: String,
    guard_key_digest: Option<String>,
    job_id: String,
    expires_at: i64,
    created_at: i64,
}

impl From<LockRow> for UniqueJobLock {
    fn from(row: LockRow) -> Self {
        UniqueJobLock {
            id: row.id,
            lock_digest: row.lock_digest,
            guard_key_digest: row.guard_key_digest,
            job_id: row.job_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use perennial_core::domain::{guard_key_digest, lock_digest, POLL_JOB_KIND};

    async fn setup_repo() -> SqliteUniqueJobLockRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteUniqueJobLockRepository::new(pool)
    }

    fn lock(metadata_id: i64, guard_key: &str, job_id: &str, now: i64) -> UniqueJobLock {
        UniqueJobLock::new(
            lock_digest(POLL_JOB_KIND, metadata_id),
            Some(guard_key_digest(guard_key)),
            job_id,
            now,
        )
    }

    #[tokio::test]
    async fn test_digest_admits_once() {
        let repo = setup_repo().await;

        let first = repo.try_insert(&lock(1, "api", "job-1", 1_000)).await.unwrap();
        let first = first.expect("first insert admitted");
        assert!(first.id > 0);

        let second = repo.try_insert(&lock(1, "api", "job-2", 2_000)).await.unwrap();
        assert!(second.is_none());

        let stored = repo.find_by_digest(&first.lock_digest).await.unwrap().unwrap();
        assert_eq!(stored.job_id, "job-1");
    }

    #[tokio::test]
    async fn test_delete_expired_only_touches_expired_rows() {
        let repo = setup_repo().await;
        let row = repo
            .try_insert(&lock(1, "api", "job-1", 1_000))
            .await
            .unwrap()
            .unwrap();

        assert!(!repo.delete_expired(&row.lock_digest, 2_000).await.unwrap());
        assert!(repo.delete_expired(&row.lock_digest, row.expires_at).await.unwrap());
        assert!(repo.find_by_digest(&row.lock_digest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_rows_by_guard_key_are_ordered() {
        let repo = setup_repo().await;
        repo.try_insert(&lock(3, "api", "c", 3_000)).await.unwrap();
        repo.try_insert(&lock(1, "api", "a", 1_000)).await.unwrap();
        repo.try_insert(&lock(2, "api", "b", 1_000)).await.unwrap();
        repo.try_insert(&lock(4, "other", "d", 1_000)).await.unwrap();

        let live = repo
            .find_live_by_guard_key(&guard_key_digest("api"), 5_000)
            .await
            .unwrap();
        let jobs: Vec<_> = live.iter().map(|l| l.job_id.as_str()).collect();
        assert_eq!(jobs, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let repo = setup_repo().await;
        let old = repo.try_insert(&lock(1, "api", "a", 0)).await.unwrap().unwrap();
        repo.try_insert(&lock(2, "api", "b", old.expires_at)).await.unwrap();

        assert_eq!(repo.purge_expired(old.expires_at).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.list(10).await.unwrap()[0].job_id, "b");
        assert!(repo.delete(&lock_digest(POLL_JOB_KIND, 2)).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}

// SQLite JobQueue Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use perennial_core::error::{AppError, Result};
use perennial_core::port::{JobQueue, QueuedJob};
use sqlx::SqlitePool;

pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn submit(&self, job: &QueuedJob) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;

        sqlx::query(
            r#"
            INSERT INTO queued_jobs (id, queue, kind, payload, run_at, created_at, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.kind)
        .bind(payload)
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(job.started_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn pop_due(&self, queue: &str, now_millis: i64) -> Result<Option<QueuedJob>> {
        // Single statement: two workers never take the same row
        let row = sqlx::query_as::<_, QueuedJobRow>(
            r#"
            UPDATE queued_jobs
            SET started_at = ?
            WHERE id = (
                SELECT id FROM queued_jobs
                WHERE queue = ? AND started_at IS NULL AND run_at <= ?
                ORDER BY run_at ASC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(queue)
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(QueuedJobRow::into_job).transpose()
    }

    async fn acknowledge(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queued_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn release(&self, id: &str, run_at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE queued_jobs SET started_at = NULL, run_at = ? WHERE id = ?")
            .bind(run_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Queued job {} not found", id)));
        }
        Ok(())
    }

    async fn count(&self, queue: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queued_jobs WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn requeue_stale(&self, started_before: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queued_jobs SET started_at = NULL WHERE started_at IS NOT NULL AND started_at < ?",
        )
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueuedJobRow {
    id: String,
    queue: String,
    kind: String,
    payload: String,
    run_at: i64,
    created_at: i64,
    started_at: Option<i64>,
}

impl QueuedJobRow {
    fn into_job(self) -> Result<QueuedJob> {
        Ok(QueuedJob {
            id: self.id,
            queue: self.queue,
            kind: self.kind,
            payload: serde_json::from_str(&self.payload)?,
            run_at: self.run_at,
            created_at: self.created_at,
            started_at: self.started_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn setup_queue() -> SqliteJobQueue {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobQueue::new(pool)
    }

    fn job(id: &str, run_at: i64, now: i64) -> QueuedJob {
        QueuedJob::new(id, "polling", "PollJob", json!({"metadata_id": 1}), run_at, now)
    }

    #[tokio::test]
    async fn test_pop_respects_run_at() {
        let queue = setup_queue().await;
        queue.submit(&job("later", 5_000, 1_000)).await.unwrap();

        assert!(queue.pop_due("polling", 4_999).await.unwrap().is_none());

        let popped = queue.pop_due("polling", 5_000).await.unwrap().unwrap();
        assert_eq!(popped.id, "later");
        assert_eq!(popped.started_at, Some(5_000));
        assert_eq!(popped.payload, json!({"metadata_id": 1}));

        // Started jobs are not handed out twice
        assert!(queue.pop_due("polling", 6_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_orders_by_run_at_then_age() {
        let queue = setup_queue().await;
        queue.submit(&job("b", 2_000, 1_000)).await.unwrap();
        queue.submit(&job("a", 2_000, 500)).await.unwrap();
        queue.submit(&job("c", 1_000, 1_500)).await.unwrap();

        let mut order = Vec::new();
        while let Some(job) = queue.pop_due("polling", 10_000).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let queue = setup_queue().await;
        let mut other = job("x", 0, 0);
        other.queue = "feeds".to_string();
        queue.submit(&other).await.unwrap();

        assert!(queue.pop_due("polling", 1_000).await.unwrap().is_none());
        assert_eq!(queue.count("feeds").await.unwrap(), 1);
        assert_eq!(queue.count("polling").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_and_acknowledge() {
        let queue = setup_queue().await;
        queue.submit(&job("j", 0, 0)).await.unwrap();
        queue.pop_due("polling", 1_000).await.unwrap().unwrap();

        queue.release("j", 30_000).await.unwrap();
        assert!(queue.pop_due("polling", 29_999).await.unwrap().is_none());
        assert!(queue.pop_due("polling", 30_000).await.unwrap().is_some());

        queue.acknowledge("j").await.unwrap();
        assert_eq!(queue.count("polling").await.unwrap(), 0);
        assert!(queue.release("j", 0).await.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_requeue_stale() {
        let queue = setup_queue().await;
        queue.submit(&job("old", 0, 0)).await.unwrap();
        queue.submit(&job("fresh", 0, 1)).await.unwrap();
        queue.pop_due("polling", 1_000).await.unwrap().unwrap();
        queue.pop_due("polling", 9_000).await.unwrap().unwrap();

        assert_eq!(queue.requeue_stale(5_000).await.unwrap(), 1);
        let again = queue.pop_due("polling", 10_000).await.unwrap().unwrap();
        assert_eq!(again.started_at, Some(10_000));
    }
}

// SQLite PollableMetaDataRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use perennial_core::domain::{MetaDataId, PollState, PollableMetaData, PollableRef};
use perennial_core::error::{AppError, Result};
use perennial_core::port::PollableMetaDataRepository;
use sqlx::SqlitePool;

pub struct SqlitePollableMetaDataRepository {
    pool: SqlitePool,
}

impl SqlitePollableMetaDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollableMetaDataRepository for SqlitePollableMetaDataRepository {
    async fn insert(&self, pollable: &PollableRef, now_millis: i64) -> Result<PollableMetaData> {
        let row = sqlx::query_as::<_, MetaDataRow>(
            r#"
            INSERT INTO pollable_meta_data (
                pollable_type, pollable_id, state, next_polling, created_at, updated_at
            ) VALUES (?, ?, ?, 0, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&pollable.pollable_type)
        .bind(pollable.pollable_id)
        .bind(PollState::Waiting.as_str())
        .bind(now_millis)
        .bind(now_millis)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.into_meta_data()
    }

    async fn find_by_id(&self, id: MetaDataId) -> Result<Option<PollableMetaData>> {
        let row = sqlx::query_as::<_, MetaDataRow>("SELECT * FROM pollable_meta_data WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(MetaDataRow::into_meta_data).transpose()
    }

    async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Option<PollableMetaData>> {
        let row = sqlx::query_as::<_, MetaDataRow>(
            "SELECT * FROM pollable_meta_data WHERE pollable_type = ? AND pollable_id = ?",
        )
        .bind(&pollable.pollable_type)
        .bind(pollable.pollable_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(MetaDataRow::into_meta_data).transpose()
    }

    async fn update(&self, meta: &PollableMetaData) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pollable_meta_data
            SET state = ?, next_polling = ?, last_polling = ?,
                deactivation_reason = ?, deactivated_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(meta.state.as_str())
        .bind(meta.next_polling)
        .bind(meta.last_polling)
        .bind(&meta.deactivation_reason)
        .bind(meta.deactivated_at)
        .bind(meta.updated_at)
        .bind(meta.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("PollableMetaData {} not found", meta.id)));
        }
        Ok(())
    }

    async fn update_if_active(&self, meta: &PollableMetaData) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pollable_meta_data
            SET state = ?, next_polling = ?, last_polling = ?,
                deactivation_reason = ?, deactivated_at = ?, updated_at = ?
            WHERE id = ? AND state != 'deactivated'
            "#,
        )
        .bind(meta.state.as_str())
        .bind(meta.next_polling)
        .bind(meta.last_polling)
        .bind(&meta.deactivation_reason)
        .bind(meta.deactivated_at)
        .bind(meta.updated_at)
        .bind(meta.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_due(
        &self,
        now_millis: i64,
        after_id: MetaDataId,
        limit: usize,
    ) -> Result<Vec<PollableMetaData>> {
        let rows: Vec<MetaDataRow> = sqlx::query_as(
            r#"
            SELECT * FROM pollable_meta_data
            WHERE state = ? AND next_polling <= ? AND id > ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(PollState::Waiting.as_str())
        .bind(now_millis)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(MetaDataRow::into_meta_data).collect()
    }

    async fn mark_enqueued(&self, id: MetaDataId, now_millis: i64) -> Result<bool> {
        // Conditional update: a concurrent tick loses the race instead of emitting twice
        let result = sqlx::query(
            "UPDATE pollable_meta_data SET state = ?, updated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(PollState::Enqueued.as_str())
        .bind(now_millis)
        .bind(id)
        .bind(PollState::Waiting.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_state(&self, state: PollState, limit: usize) -> Result<Vec<PollableMetaData>> {
        let rows: Vec<MetaDataRow> = sqlx::query_as(
            "SELECT * FROM pollable_meta_data WHERE state = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(MetaDataRow::into_meta_data).collect()
    }

    async fn count_by_state(&self) -> Result<Vec<(PollState, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM pollable_meta_data GROUP BY state ORDER BY state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(state, count)| Ok((state.parse::<PollState>()?, count)))
            .collect()
    }

    async fn delete(&self, id: MetaDataId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pollable_meta_data WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct MetaDataRow {
    id: i64,
    pollable_type: String,
    pollable_id: i64,
    state: String,
    next_polling: i64,
    last_polling: Option<i64>,
    deactivation_reason: Option<String>,
    deactivated_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl MetaDataRow {
    fn into_meta_data(self) -> Result<PollableMetaData> {
        Ok(PollableMetaData {
            id: self.id,
            pollable: PollableRef::new(self.pollable_type, self.pollable_id),
            state: self.state.parse()?,
            next_polling: self.next_polling,
            last_polling: self.last_polling,
            deactivation_reason: self.deactivation_reason,
            deactivated_at: self.deactivated_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// SQLite SourceRepository Implementation

use crate::error::map_sqlx_error;
use crate::transaction::SqliteSourceTransaction;
use async_trait::async_trait;
use perennial_core::domain::{Fingerprint, PollableRef, Source};
use perennial_core::error::Result;
use perennial_core::port::{SourceRepository, SourceRepositoryTransaction, TransactionalSourceRepository};
use sqlx::SqlitePool;

pub struct SqliteSourceRepository {
    pool: SqlitePool,
}

impl SqliteSourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionalSourceRepository for SqliteSourceRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn SourceRepositoryTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteSourceTransaction::new(tx)))
    }
}

#[async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(Source::from))
    }

    async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT * FROM sources
            WHERE pollable_type = ? AND pollable_id = ?
            ORDER BY created_at ASC, fingerprint ASC
            "#,
        )
        .bind(&pollable.pollable_type)
        .bind(pollable.pollable_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Source::from).collect())
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    fingerprint: String,
    pollable_type: String,
    pollable_id: i64,
    created_at: i64,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            fingerprint: row.fingerprint,
            pollable: PollableRef::new(row.pollable_type, row.pollable_id),
            created_at: row.created_at,
        }
    }
}

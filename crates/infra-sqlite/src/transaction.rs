// SQLite Transaction Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use perennial_core::domain::{Fingerprint, Source};
use perennial_core::error::Result;
use perennial_core::port::{SourceRepositoryTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

/// Source writes inside one SQLite transaction.
///
/// Dropping without commit rolls back (sqlx semantics).
pub struct SqliteSourceTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteSourceTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteSourceTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl SourceRepositoryTransaction for SqliteSourceTransaction {
    async fn exists(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sources WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(found.is_some())
    }

    async fn insert(&mut self, source: &Source) -> Result<bool> {
        // Existing fingerprint wins; content is write-once
        let result = sqlx::query(
            r#"
            INSERT INTO sources (fingerprint, pollable_type, pollable_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&source.fingerprint)
        .bind(&source.pollable.pollable_type)
        .bind(source.pollable.pollable_id)
        .bind(source.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

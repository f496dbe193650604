// Migration Runner

use crate::error::map_sqlx_error;
use perennial_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: [(i64, &str, &str); 4] = [
    (
        1,
        "pollable meta data",
        include_str!("../migrations/001_pollable_meta_data.sql"),
    ),
    (
        2,
        "unique job locks",
        include_str!("../migrations/002_unique_job_locks.sql"),
    ),
    (3, "sources", include_str!("../migrations/003_sources.sql")),
    (4, "queued jobs", include_str!("../migrations/004_queued_jobs.sql")),
];

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?
            .unwrap_or(0)
    } else {
        0
    };

    info!("Current schema version: {}", current_version);

    for (version, name, sql) in MIGRATIONS {
        if current_version < version {
            info!("Applying migration {:03}: {}", version, name);
            apply_migration(pool, sql).await?;
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    for statement in split_statements(sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

/// Strip `--` comments, then split on semicolons.
///
/// Migrations hold no string literals containing `--` or `;`.
fn split_statements(sql: &str) -> Vec<String> {
    let uncommented = sql
        .lines()
        .map(|line| line.split_once("--").map_or(line, |(code, _)| code))
        .collect::<Vec<_>>()
        .join("\n");

    uncommented
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[test]
    fn test_split_statements_ignores_comments() {
        let sql = "-- first; not a statement\nCREATE TABLE a (x INTEGER); -- trailing; note\n\n-- only a comment\nCREATE INDEX i ON a (x);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (x INTEGER)", "CREATE INDEX i ON a (x)"]
        );
    }

    #[test]
    fn test_every_migration_splits_into_sql() {
        for (version, _, sql) in MIGRATIONS {
            let statements = split_statements(sql);
            assert!(!statements.is_empty(), "migration {version}");
            for statement in statements {
                let head = statement.split_whitespace().next().unwrap_or_default();
                assert!(
                    matches!(head, "CREATE" | "INSERT"),
                    "migration {version}: {statement}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in ["pollable_meta_data", "unique_job_locks", "sources", "queued_jobs"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{table}");
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 4);
    }
}

// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use perennial_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create SQLite connection pool with WAL mode and optimizations.
///
/// In-memory databases are private to one connection, so their pool keeps
/// exactly one connection alive.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    if let Some(scheme) = foreign_scheme(database_url) {
        return Err(AppError::Config(format!(
            "unsupported database scheme {scheme} in {database_url}, expected sqlite: or a file path"
        )));
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url {database_url}: {e}")))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool_options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(10)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    Ok(pool)
}

/// URL scheme other than `sqlite`; one-letter prefixes are drive letters
fn foreign_scheme(database_url: &str) -> Option<&str> {
    let (scheme, _) = database_url.split_once(':')?;
    let is_scheme = scheme.len() > 1
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (is_scheme && !scheme.eq_ignore_ascii_case("sqlite")).then_some(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_malformed_url() {
        let err = create_pool("postgres://nope").await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_foreign_scheme() {
        assert_eq!(foreign_scheme("postgres://nope"), Some("postgres"));
        assert_eq!(foreign_scheme("mysql:host"), Some("mysql"));
        assert_eq!(foreign_scheme("sqlite::memory:"), None);
        assert_eq!(foreign_scheme("sqlite:/data/p.db?mode=rwc"), None);
        assert_eq!(foreign_scheme("/tmp/p.db"), None);
        assert_eq!(foreign_scheme("C:/data/p.db"), None);
    }
}

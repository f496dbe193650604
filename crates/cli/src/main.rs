//! Perennial CLI - operator commands against the polling store

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use perennial_core::application::{ContentStore, JobUniqueness, PollableService};
use perennial_core::domain::{PollState, PollableMetaData, PollableRef, UniqueJobLock};
use perennial_core::port::time_provider::SystemTimeProvider;
use perennial_core::port::{
    JobQueue, PollableMetaDataRepository, TimeProvider, UniqueJobLockRepository,
};
use perennial_infra_fs::FileBlobStore;
use perennial_infra_sqlite::{
    create_pool, run_migrations, SqliteJobQueue, SqlitePollableMetaDataRepository,
    SqliteSourceRepository, SqliteUniqueJobLockRepository,
};
use std::sync::Arc;
use tabled::{Table, Tabled};

const DEFAULT_DB_PATH: &str = "~/.perennial/perennial.db";
const DEFAULT_BLOB_DIR: &str = "~/.perennial/blobs";

#[derive(Parser)]
#[command(name = "perennial")]
#[command(about = "Perennial polling scheduler CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path or URL
    #[arg(long, env = "PERENNIAL_DATABASE_URL", default_value = DEFAULT_DB_PATH)]
    database_url: String,

    /// Blob directory of stored sources
    #[arg(long, env = "PERENNIAL_BLOB_DIR", default_value = DEFAULT_BLOB_DIR)]
    blob_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show counts per polling state, locks, sources and queued jobs
    Status {
        /// Queues to report job counts for
        #[arg(short, long, default_value = "polling")]
        queue: Vec<String>,
    },

    /// List pollable meta data in a state
    List {
        /// waiting, enqueued, polling or deactivated
        #[arg(short, long, default_value = "waiting")]
        state: String,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Show the meta data of one pollable
    Show {
        pollable_type: String,
        pollable_id: i64,
    },

    /// Register a pollable (immediately due)
    Register {
        pollable_type: String,
        pollable_id: i64,
    },

    /// Stop polling a pollable for good
    Deactivate {
        pollable_type: String,
        pollable_id: i64,

        #[arg(short, long, default_value = "Deactivated by operator")]
        reason: String,
    },

    /// List job uniqueness locks
    Locks {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Delete expired job uniqueness locks
    PurgeLocks,

    /// List stored sources of a pollable
    Sources {
        pollable_type: String,
        pollable_id: i64,
    },
}

#[derive(Tabled)]
struct MetaDataRow {
    id: i64,
    pollable: String,
    state: String,
    next_polling: String,
    last_polling: String,
    deactivation_reason: String,
}

impl From<&PollableMetaData> for MetaDataRow {
    fn from(meta: &PollableMetaData) -> Self {
        Self {
            id: meta.id,
            pollable: meta.pollable.to_string(),
            state: meta.state.to_string(),
            next_polling: if meta.state == PollState::Waiting {
                format_millis(meta.next_polling)
            } else {
                "-".to_string()
            },
            last_polling: meta.last_polling.map(format_millis).unwrap_or_else(|| "-".to_string()),
            deactivation_reason: meta.deactivation_reason.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct LockRow {
    id: i64,
    job_id: String,
    lock_digest: String,
    guard_key_digest: String,
    created_at: String,
    expires_at: String,
}

impl From<&UniqueJobLock> for LockRow {
    fn from(lock: &UniqueJobLock) -> Self {
        Self {
            id: lock.id,
            job_id: lock.job_id.clone(),
            lock_digest: short_digest(&lock.lock_digest),
            guard_key_digest: lock
                .guard_key_digest
                .as_deref()
                .map(short_digest)
                .unwrap_or_else(|| "-".to_string()),
            created_at: format_millis(lock.created_at),
            expires_at: format_millis(lock.expires_at),
        }
    }
}

#[derive(Tabled)]
struct SourceRow {
    fingerprint: String,
    created_at: String,
    size: String,
}

/// Epoch ms as RFC 3339 (UTC); epoch zero means "immediately"
fn format_millis(millis: i64) -> String {
    if millis == 0 {
        return "immediately".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(12).collect()
}

fn colored_state(state: PollState) -> colored::ColoredString {
    match state {
        PollState::Waiting => state.as_str().green(),
        PollState::Enqueued => state.as_str().cyan(),
        PollState::Polling => state.as_str().yellow(),
        PollState::Deactivated => state.as_str().red(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let database_url = shellexpand::tilde(&cli.database_url).into_owned();
    let pool = create_pool(&database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    run_migrations(&pool).await.context("Migration failed")?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let meta_repo: Arc<dyn PollableMetaDataRepository> =
        Arc::new(SqlitePollableMetaDataRepository::new(pool.clone()));
    let lock_repo: Arc<dyn UniqueJobLockRepository> =
        Arc::new(SqliteUniqueJobLockRepository::new(pool.clone()));

    match cli.command {
        Commands::Status { queue } => {
            println!("{}", "Polling Status".cyan().bold());
            println!();

            let counts = meta_repo.count_by_state().await?;
            for state in [
                PollState::Waiting,
                PollState::Enqueued,
                PollState::Polling,
                PollState::Deactivated,
            ] {
                let count = counts
                    .iter()
                    .find(|(s, _)| *s == state)
                    .map_or(0, |(_, c)| *c);
                println!("  {:<14} {}", format!("{}:", colored_state(state)), count);
            }
            println!();

            println!("  {} {}", "Locks:".bold(), lock_repo.count().await?);
            let content_store = content_store(&cli.blob_dir, pool.clone(), time_provider.clone());
            println!("  {} {}", "Sources:".bold(), content_store.count().await?);

            let job_queue = SqliteJobQueue::new(pool);
            for name in queue {
                println!(
                    "  {} {}",
                    format!("Queue {}:", name).bold(),
                    job_queue.count(&name).await?
                );
            }
        }

        Commands::List { state, limit } => {
            let state: PollState = state.parse()?;
            let rows = meta_repo.find_by_state(state, limit).await?;
            if rows.is_empty() {
                println!("{}", format!("No pollables in state {}", state).yellow());
            } else {
                let rows: Vec<MetaDataRow> = rows.iter().map(MetaDataRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Show {
            pollable_type,
            pollable_id,
        } => {
            let pollable = PollableRef::new(pollable_type, pollable_id);
            match meta_repo.find_by_pollable(&pollable).await? {
                Some(meta) => println!("{}", Table::new(vec![MetaDataRow::from(&meta)])),
                None => println!("{}", format!("{} is not registered", pollable).yellow()),
            }
        }

        Commands::Register {
            pollable_type,
            pollable_id,
        } => {
            let pollable = PollableRef::new(pollable_type, pollable_id);
            let service = PollableService::new(meta_repo, time_provider);
            let meta = service.register(&pollable).await?;
            println!(
                "{}",
                format!("✓ {} registered (meta data {})", pollable, meta.id).green().bold()
            );
        }

        Commands::Deactivate {
            pollable_type,
            pollable_id,
            reason,
        } => {
            let pollable = PollableRef::new(pollable_type, pollable_id);
            let service = PollableService::new(meta_repo, time_provider);
            service.deactivate(&pollable, &reason).await?;
            println!("{}", format!("✓ {} deactivated", pollable).green().bold());
        }

        Commands::Locks { limit } => {
            let locks = lock_repo.list(limit).await?;
            if locks.is_empty() {
                println!("{}", "No uniqueness locks".yellow());
            } else {
                let rows: Vec<LockRow> = locks.iter().map(LockRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::PurgeLocks => {
            let uniqueness = JobUniqueness::new(lock_repo, time_provider);
            let purged = uniqueness.purge_expired().await?;
            println!("{} {} expired locks deleted", "✓".green(), purged);
        }

        Commands::Sources {
            pollable_type,
            pollable_id,
        } => {
            let pollable = PollableRef::new(pollable_type, pollable_id);
            let content_store = content_store(&cli.blob_dir, pool, time_provider);
            let sources = content_store.sources_for(&pollable).await?;
            if sources.is_empty() {
                println!("{}", format!("No sources stored for {}", pollable).yellow());
                return Ok(());
            }

            let mut rows = Vec::with_capacity(sources.len());
            for source in sources {
                let size = match content_store.retrieve(&source.fingerprint).await? {
                    Some(handle) => match handle.content_size().await {
                        Ok(bytes) => format!("{} B", bytes),
                        Err(_) => "missing".to_string(),
                    },
                    None => "-".to_string(),
                };
                rows.push(SourceRow {
                    fingerprint: source.fingerprint,
                    created_at: format_millis(source.created_at),
                    size,
                });
            }
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn content_store(
    blob_dir: &str,
    pool: perennial_infra_sqlite::SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
) -> ContentStore {
    let blob_dir = shellexpand::tilde(blob_dir).into_owned();
    ContentStore::new(
        Arc::new(SqliteSourceRepository::new(pool)),
        Arc::new(FileBlobStore::new(blob_dir)),
        time_provider,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "immediately");
        assert_eq!(format_millis(1_706_659_200_000), "2024-01-31 00:00:00 UTC");
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short_digest("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_digest("abc"), "abc");
    }

    #[test]
    fn test_parses_deactivate() {
        let cli = Cli::try_parse_from([
            "perennial",
            "--database-url",
            "sqlite::memory:",
            "deactivate",
            "Website",
            "7",
            "--reason",
            "domain expired",
        ])
        .unwrap();

        match cli.command {
            Commands::Deactivate {
                pollable_type,
                pollable_id,
                reason,
            } => {
                assert_eq!(pollable_type, "Website");
                assert_eq!(pollable_id, 7);
                assert_eq!(reason, "domain expired");
            }
            _ => panic!("expected deactivate"),
        }
    }

    #[test]
    fn test_meta_data_row_hides_next_polling_outside_waiting() {
        let mut meta = PollableMetaData::new(1, PollableRef::new("Website", 7), 1_000);
        assert_eq!(MetaDataRow::from(&meta).next_polling, "immediately");

        meta.enqueue(2_000).unwrap();
        let row = MetaDataRow::from(&meta);
        assert_eq!(row.state, "enqueued");
        assert_eq!(row.next_polling, "-");
        assert_eq!(row.pollable, "Website#7");
    }
}

// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration when no jobs are available (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Delay before a job whose run failed on infrastructure errors is retried (30s)
pub const INFRA_ERROR_RETRY_DELAY_MS: i64 = 30 * 1000;

/// Re-submission delay after a blocking guard wait (2s)
pub const BLOCKING_GUARD_RETRY_DELAY_MS: i64 = 2000;

/// Upper bound of the random jitter added to staggered guard retries (2s)
pub const STAGGER_MAX_JITTER_MS: i64 = 2000;

/// Default interval between scheduler ticks (10s)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of meta data rows loaded per tick batch
pub const DEFAULT_TICK_BATCH_SIZE: usize = 500;

/// Default recovery window for orphaned jobs (15 minutes).
///
/// Must outlast the guard timeout: a started job younger than that may still
/// be polling in another process.
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 15 * 60 * 1000;

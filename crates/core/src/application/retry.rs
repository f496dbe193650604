// Retry backoff for failed polls
use rand::Rng;
use tracing::{info, warn};

/// Delay ladder indexed by attempt number; later attempts reuse the last step
pub const BACKOFF_LADDER_MS: [i64; 4] = [
    60 * 1000,               // 1 minute
    60 * 60 * 1000,          // 1 hour
    24 * 60 * 60 * 1000,     // 1 day
    7 * 24 * 60 * 60 * 1000, // 1 week
];

/// Total attempts (first run included) before a pollable is deactivated
pub const MAX_ATTEMPTS: u32 = 5;

/// Upper bound of the jitter added to a backoff delay
pub const MAX_BACKOFF_JITTER_MS: i64 = 10 * 60 * 1000;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay in ms
    Retry(i64),
    /// Attempts used up
    Exhausted,
}

/// Bounded retry policy for generic poll failures.
///
/// Guard contention is not a failure and never consults this policy.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after attempt `attempt` (1-based) failed
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            warn!(
                attempt = %attempt,
                max_attempts = %self.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let base = Self::base_delay_ms(attempt);
        let jitter_cap = Self::jitter_cap_ms(base);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        let delay_ms = base + jitter;

        info!(
            attempt = %attempt,
            max_attempts = %self.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }

    /// Ladder step for a failed attempt, without jitter
    pub fn base_delay_ms(attempt: u32) -> i64 {
        let index = (attempt.max(1) - 1) as usize;
        BACKOFF_LADDER_MS[index.min(BACKOFF_LADDER_MS.len() - 1)]
    }

    /// `min(10% of delay, 10 minutes)`
    pub fn jitter_cap_ms(delay_ms: i64) -> i64 {
        (delay_ms / 10).min(MAX_BACKOFF_JITTER_MS)
    }
}

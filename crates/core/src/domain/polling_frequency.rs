// Polling Frequency - computes the next poll time after a successful poll

use crate::domain::error::{DomainError, Result};
use chrono::{DateTime, Months, Utc};
use std::fmt;
use std::sync::Arc;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Caller-supplied frequency: `(pollable, last_polling_ms) -> next_polling_ms`
pub type FrequencyFn<P> = Arc<dyn Fn(&P, i64) -> i64 + Send + Sync>;

/// When a pollable becomes due again.
///
/// Presets are fixed intervals counted from the last poll; `Monthly` is a
/// calendar month. `Custom` wraps an arbitrary pure function of the pollable.
pub enum PollingFrequency<P> {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom(FrequencyFn<P>),
}

impl<P> PollingFrequency<P> {
    /// Resolve a preset by name (`hourly`, `daily`, `weekly`, `monthly`)
    pub fn by_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(PollingFrequency::Hourly),
            "daily" => Ok(PollingFrequency::Daily),
            "weekly" => Ok(PollingFrequency::Weekly),
            "monthly" => Ok(PollingFrequency::Monthly),
            other => Err(DomainError::UnknownFrequency(other.to_string())),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&P, i64) -> i64 + Send + Sync + 'static,
    {
        PollingFrequency::Custom(Arc::new(f))
    }

    /// Next eligible poll time (epoch ms)
    pub fn next(&self, pollable: &P, last_polling: i64) -> i64 {
        match self {
            PollingFrequency::Hourly => last_polling + HOUR_MS,
            PollingFrequency::Daily => last_polling + DAY_MS,
            PollingFrequency::Weekly => last_polling + WEEK_MS,
            PollingFrequency::Monthly => add_months(last_polling, 1),
            PollingFrequency::Custom(f) => f(pollable, last_polling),
        }
    }
}

impl<P> Default for PollingFrequency<P> {
    fn default() -> Self {
        PollingFrequency::Daily
    }
}

impl<P> Clone for PollingFrequency<P> {
    fn clone(&self) -> Self {
        match self {
            PollingFrequency::Hourly => PollingFrequency::Hourly,
            PollingFrequency::Daily => PollingFrequency::Daily,
            PollingFrequency::Weekly => PollingFrequency::Weekly,
            PollingFrequency::Monthly => PollingFrequency::Monthly,
            PollingFrequency::Custom(f) => PollingFrequency::Custom(Arc::clone(f)),
        }
    }
}

impl<P> fmt::Debug for PollingFrequency<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingFrequency::Hourly => write!(f, "Hourly"),
            PollingFrequency::Daily => write!(f, "Daily"),
            PollingFrequency::Weekly => write!(f, "Weekly"),
            PollingFrequency::Monthly => write!(f, "Monthly"),
            PollingFrequency::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Calendar-month arithmetic on epoch ms (day clamped to month end)
pub fn add_months(epoch_millis: i64, months: u32) -> i64 {
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .and_then(|t| t.checked_add_months(Months::new(months)))
        .map(|t| t.timestamp_millis())
        // Out of chrono's range: fall back to 31 days per month
        .unwrap_or(epoch_millis + i64::from(months) * 31 * DAY_MS)
}

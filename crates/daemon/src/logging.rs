// Tracing initialisation

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "perennial=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Production: JSON structured logging
    Json,
    /// Development: pretty formatting with colors
    Pretty,
}

impl LogFormat {
    /// Read `PERENNIAL_LOG_FORMAT` (`json` or `pretty`, default pretty)
    pub fn from_env() -> Self {
        match std::env::var("PERENNIAL_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// With `log_dir` set, output goes to a daily-rotated file through a
/// non-blocking writer; keep the returned guard alive until exit so buffered
/// lines are flushed.
pub fn init_logging(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| anyhow!("Failed to create env filter: {}", e))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match (format, log_dir) {
        (LogFormat::Json, None) => registry.with(fmt::layer().json()).try_init()?,
        (LogFormat::Pretty, None) => registry.with(fmt::layer().pretty()).try_init()?,
        (format, Some(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "perennial.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            match format {
                LogFormat::Json => registry.with(layer.json()).try_init()?,
                LogFormat::Pretty => registry.with(layer).try_init()?,
            }
            return Ok(Some(guard));
        }
    }
    Ok(None)
}

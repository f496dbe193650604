// Daemon settings: defaults < config file < PERENNIAL_* environment

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use perennial_core::domain::pollable::DEFAULT_QUEUE;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "perennial.toml";
const DEFAULT_DB_PATH: &str = "~/.perennial/perennial.db";
const DEFAULT_BLOB_DIR: &str = "~/.perennial/blobs";
const ENV_PREFIX: &str = "PERENNIAL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// SQLite file path or `sqlite:` URL
    pub database_url: String,
    /// Shared guard store; guards are process-local when unset
    pub redis_url: Option<String>,
    pub redis_namespace: String,
    pub blob_dir: String,
    pub tick_interval_secs: u64,
    pub tick_batch_size: usize,
    pub recovery_window_secs: u64,
    /// Queues to run workers for, in addition to the registered kinds' queues
    pub queues: Vec<String>,
    /// Daily-rotated log files are written here when set
    pub log_dir: Option<String>,
}

impl Settings {
    /// Load from `PERENNIAL_CONFIG` (or `./perennial.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("PERENNIAL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with `path` as the optional config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings: Settings = Self::builder()?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("queues"),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        Ok(settings.expanded())
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("database_url", DEFAULT_DB_PATH)?
            .set_default("redis_namespace", perennial_infra_redis::DEFAULT_NAMESPACE)?
            .set_default("blob_dir", DEFAULT_BLOB_DIR)?
            .set_default("tick_interval_secs", 10_u64)?
            .set_default("tick_batch_size", 500_u64)?
            .set_default("recovery_window_secs", 900_u64)?
            .set_default("queues", vec![DEFAULT_QUEUE.to_string()])?)
    }

    fn expanded(mut self) -> Self {
        self.database_url = expand_database_url(&self.database_url);
        self.blob_dir = shellexpand::tilde(&self.blob_dir).into_owned();
        self.log_dir = self.log_dir.map(|d| shellexpand::tilde(&d).into_owned());
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn recovery_window_ms(&self) -> i64 {
        (self.recovery_window_secs as i64).saturating_mul(1000)
    }

    /// Database file on disk, `None` for in-memory databases
    pub fn database_file(&self) -> Option<&Path> {
        if self.database_url.contains(":memory:") {
            return None;
        }
        let path = self
            .database_url
            .trim_start_matches("sqlite:")
            .trim_start_matches("//");
        Some(Path::new(path.split('?').next().unwrap_or(path)))
    }
}

/// Tilde-expand bare paths and `sqlite:` URLs alike
fn expand_database_url(url: &str) -> String {
    match url.strip_prefix("sqlite:") {
        Some(rest) if !rest.starts_with(":memory:") && !rest.starts_with("//") => {
            format!("sqlite:{}", shellexpand::tilde(rest))
        }
        Some(_) => url.to_string(),
        None => shellexpand::tilde(url).into_owned(),
    }
}

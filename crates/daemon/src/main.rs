//! Perennial daemon - main entry point

use anyhow::Result;
use perennial_core::application::PollableRegistry;
use perennial_daemon::{init_logging, Engine, LogFormat, Settings};
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = init_logging(LogFormat::from_env(), settings.log_dir.as_deref().map(Path::new))?;

    info!("Perennial v{} starting...", perennial_core::VERSION);

    let engine = Engine::connect(settings).await?;

    // Pollable kinds are compiled in by embedders through perennial_daemon::Engine
    let registry = PollableRegistry::new();

    engine
        .run(registry, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = ?e, "Failed to listen for Ctrl+C");
            }
        })
        .await
}

// Engine: wires adapters into the scheduler tick loop and poll job workers

use crate::settings::Settings;
use anyhow::{Context, Result};
use futures::future::join_all;
use perennial_core::application::{
    shutdown_channel, BackoffPolicy, ContentStore, Guard, JobUniqueness, PollJobClient,
    PollJobRunner, PollableRegistry, PollableService, RecoveryService, Scheduler, Worker,
};
use perennial_core::port::id_provider::UuidProvider;
use perennial_core::port::time_provider::SystemTimeProvider;
use perennial_core::port::{
    IdProvider, InMemoryKeyedStore, JobQueue, KeyedStore, PollableMetaDataRepository,
    TimeProvider, UniqueJobLockRepository,
};
use perennial_infra_fs::FileBlobStore;
use perennial_infra_redis::RedisKeyedStore;
use perennial_infra_sqlite::{
    create_pool, run_migrations, SqliteJobQueue, SqlitePollableMetaDataRepository,
    SqliteSourceRepository, SqliteUniqueJobLockRepository,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Connected stores plus the settings that drive the loops
pub struct Engine {
    settings: Settings,
    meta_repo: Arc<dyn PollableMetaDataRepository>,
    lock_repo: Arc<dyn UniqueJobLockRepository>,
    job_queue: Arc<dyn JobQueue>,
    keyed_store: Arc<dyn KeyedStore>,
    content_store: Arc<ContentStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl Engine {
    /// Open the database (running migrations), the guard store and the blob directory
    pub async fn connect(settings: Settings) -> Result<Self> {
        if let Some(parent) = settings.database_file().and_then(|f| f.parent()) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        info!(database_url = %settings.database_url, "Initializing database...");
        let pool = create_pool(&settings.database_url)
            .await
            .context("DB pool creation failed")?;
        run_migrations(&pool).await.context("Migration failed")?;

        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);

        let keyed_store: Arc<dyn KeyedStore> = match &settings.redis_url {
            Some(url) => Arc::new(
                RedisKeyedStore::connect(url, settings.redis_namespace.clone(), time_provider.clone())
                    .await
                    .context("Redis connection failed")?,
            ),
            None => {
                warn!("No redis_url configured, guards only coordinate workers of this process");
                Arc::new(InMemoryKeyedStore::new(time_provider.clone()))
            }
        };

        let blobs = FileBlobStore::open(&settings.blob_dir)
            .await
            .with_context(|| format!("Failed to open blob directory {}", settings.blob_dir))?;
        let content_store = Arc::new(ContentStore::new(
            Arc::new(SqliteSourceRepository::new(pool.clone())),
            Arc::new(blobs),
            time_provider.clone(),
        ));

        Ok(Self {
            meta_repo: Arc::new(SqlitePollableMetaDataRepository::new(pool.clone())),
            lock_repo: Arc::new(SqliteUniqueJobLockRepository::new(pool.clone())),
            job_queue: Arc::new(SqliteJobQueue::new(pool)),
            keyed_store,
            content_store,
            time_provider,
            id_provider,
            settings,
        })
    }

    /// Store for poll results; hand it to loaders that persist content
    pub fn content_store(&self) -> Arc<ContentStore> {
        Arc::clone(&self.content_store)
    }

    /// Register and deactivate pollables
    pub fn pollables(&self) -> PollableService {
        PollableService::new(self.meta_repo.clone(), self.time_provider.clone())
    }

    /// Queues served by workers: configured ones plus those of registered kinds
    pub fn worker_queues(&self, registry: &PollableRegistry) -> Vec<String> {
        self.settings
            .queues
            .iter()
            .cloned()
            .chain(registry.queues())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Run the tick loop and one worker per queue until `shutdown_signal` resolves
    pub async fn run<F>(self, registry: PollableRegistry, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if registry.is_empty() {
            warn!("No pollable kinds registered, due rows will be left waiting");
        } else {
            info!(kinds = ?registry.type_names(), "Pollable kinds registered");
        }
        let queues = self.worker_queues(&registry);
        let registry = Arc::new(registry);

        info!("Running crash recovery...");
        let recovery = RecoveryService::new(
            self.job_queue.clone(),
            self.time_provider.clone(),
            Some(self.settings.recovery_window_ms()),
        )
        .covering_guard_lease(registry.max_guard_timeout());
        match recovery.recover_orphaned_jobs().await {
            Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
            Err(e) => error!(error = ?e, "Crash recovery failed"),
        }

        let uniqueness = Arc::new(JobUniqueness::new(
            self.lock_repo.clone(),
            self.time_provider.clone(),
        ));
        match uniqueness.purge_expired().await {
            Ok(purged) => info!(purged, "Expired uniqueness locks purged"),
            Err(e) => error!(error = ?e, "Failed to purge expired uniqueness locks"),
        }

        let client = Arc::new(PollJobClient::new(
            self.job_queue.clone(),
            uniqueness.clone(),
            registry.clone(),
            self.id_provider.clone(),
            self.time_provider.clone(),
        ));
        let guard = Arc::new(Guard::new(
            self.keyed_store.clone(),
            self.time_provider.clone(),
            self.id_provider.clone(),
        ));
        let runner = Arc::new(PollJobRunner::new(
            self.meta_repo.clone(),
            registry.clone(),
            guard,
            uniqueness,
            client.clone(),
            BackoffPolicy::default(),
            self.time_provider.clone(),
        ));
        let scheduler = Scheduler::new(
            self.meta_repo.clone(),
            registry,
            client,
            self.time_provider.clone(),
            self.settings.tick_batch_size,
        );

        let (shutdown_tx, token) = shutdown_channel();
        let mut handles = Vec::with_capacity(queues.len() + 1);

        let interval = self.settings.tick_interval();
        handles.push(tokio::spawn(async move {
            if let Err(e) = scheduler.run(token, interval).await {
                error!(error = ?e, "Scheduler failed");
            }
        }));

        for queue in queues {
            info!(queue = %queue, "Starting worker...");
            let worker = Worker::new(
                queue,
                self.job_queue.clone(),
                runner.clone(),
                self.time_provider.clone(),
            );
            let token = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(token).await {
                    error!(error = ?e, "Worker failed");
                }
            }));
        }

        info!("System ready. Polling...");
        shutdown_signal.await;

        info!("Shutdown signal received. Stopping loops...");
        shutdown_tx.shutdown();
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles))
            .await
            .is_err()
        {
            warn!("Loops did not stop within the grace period");
        }

        info!("Shutdown complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perennial_core::domain::{PollState, PollableConfig, PollableRef};
    use perennial_core::port::pollable::mocks::{ScriptedLoader, ScriptedPollable};

    fn settings(blob_dir: &std::path::Path) -> Settings {
        Settings {
            database_url: "sqlite::memory:".to_string(),
            redis_url: None,
            redis_namespace: "perennial-test".to_string(),
            blob_dir: blob_dir.display().to_string(),
            tick_interval_secs: 1,
            tick_batch_size: 10,
            recovery_window_secs: 900,
            queues: vec!["polling".to_string()],
            log_dir: None,
        }
    }

    #[tokio::test]
    async fn test_worker_queues_merge_settings_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::connect(settings(dir.path())).await.unwrap();

        let mut registry = PollableRegistry::new();
        registry.register(
            "Feed",
            PollableConfig::<ScriptedPollable>::builder().queue("feeds").build(),
            ScriptedLoader::new(),
        );

        assert_eq!(
            engine.worker_queues(&registry),
            vec!["feeds".to_string(), "polling".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_polls_registered_pollable_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::connect(settings(dir.path())).await.unwrap();

        let pollable = ScriptedPollable::new(1);
        let loader = ScriptedLoader::new();
        loader.add(pollable.clone());

        let website = PollableRef::new("Website", 1);
        let pollables = engine.pollables();
        pollables.register(&website).await.unwrap();

        let mut registry = PollableRegistry::new();
        registry.register(
            "Website",
            PollableConfig::<ScriptedPollable>::builder().build(),
            loader,
        );

        engine
            .run(registry, tokio::time::sleep(Duration::from_millis(1500)))
            .await
            .unwrap();

        assert_eq!(pollable.poll_count(), 1);
        let meta = pollables.find(&website).await.unwrap().unwrap();
        assert_eq!(meta.state, PollState::Waiting);
        assert!(meta.last_polling.is_some());
    }
}

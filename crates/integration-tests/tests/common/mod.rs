//! Shared wiring: SQLite (in memory) + in-process keyed store + mock clock

#![allow(dead_code)]

use perennial_core::application::{
    BackoffPolicy, Guard, JobUniqueness, PollJobClient, PollJobOutcome, PollJobRunner,
    PollableRegistry, PollableService, Scheduler,
};
use perennial_core::domain::{PollableConfig, PollableMetaData, PollableRef};
use perennial_core::port::id_provider::mocks::SequentialIdProvider;
use perennial_core::port::pollable::mocks::{ScriptedLoader, ScriptedPollable};
use perennial_core::port::time_provider::mocks::MockTimeProvider;
use perennial_core::port::{InMemoryKeyedStore, JobQueue, PollableMetaDataRepository, QueuedJob};
use perennial_infra_sqlite::{
    create_pool, run_migrations, SqliteJobQueue, SqlitePollableMetaDataRepository, SqlitePool,
    SqliteUniqueJobLockRepository,
};
use std::sync::Arc;

pub const TYPE_NAME: &str = "Website";
pub const QUEUE: &str = "polling";
pub const START: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct Stack {
    pub pool: SqlitePool,
    pub clock: Arc<MockTimeProvider>,
    pub meta_repo: Arc<SqlitePollableMetaDataRepository>,
    pub locks: Arc<SqliteUniqueJobLockRepository>,
    pub queue: Arc<SqliteJobQueue>,
    pub loader: ScriptedLoader,
    pub uniqueness: Arc<JobUniqueness>,
    pub client: Arc<PollJobClient>,
    pub runner: Arc<PollJobRunner>,
    pub scheduler: Scheduler,
    pub pollables: PollableService,
}

impl Stack {
    /// Guard key taken from each scripted pollable
    pub async fn new() -> Self {
        Self::with_config(
            PollableConfig::<ScriptedPollable>::builder()
                .guard_key_fn(|p: &ScriptedPollable| p.guard_key.clone())
                .build(),
        )
        .await
    }

    pub async fn with_config(config: PollableConfig<ScriptedPollable>) -> Self {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let clock = Arc::new(MockTimeProvider::new(START));
        let ids = Arc::new(SequentialIdProvider::new("job"));
        let meta_repo = Arc::new(SqlitePollableMetaDataRepository::new(pool.clone()));
        let locks = Arc::new(SqliteUniqueJobLockRepository::new(pool.clone()));
        let queue = Arc::new(SqliteJobQueue::new(pool.clone()));
        let keyed_store = Arc::new(InMemoryKeyedStore::new(clock.clone()));
        let loader = ScriptedLoader::new();

        let mut registry = PollableRegistry::new();
        registry.register(TYPE_NAME, config, loader.clone());
        let registry = Arc::new(registry);

        let uniqueness = Arc::new(JobUniqueness::new(locks.clone(), clock.clone()));
        let client = Arc::new(PollJobClient::new(
            queue.clone(),
            uniqueness.clone(),
            registry.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let guard = Arc::new(Guard::new(keyed_store, clock.clone(), ids));
        let runner = Arc::new(PollJobRunner::new(
            meta_repo.clone(),
            registry.clone(),
            guard,
            uniqueness.clone(),
            client.clone(),
            BackoffPolicy::default(),
            clock.clone(),
        ));
        let scheduler = Scheduler::new(
            meta_repo.clone(),
            registry,
            client.clone(),
            clock.clone(),
            100,
        );
        let pollables = PollableService::new(meta_repo.clone(), clock.clone());

        Self {
            pool,
            clock,
            meta_repo,
            locks,
            queue,
            loader,
            uniqueness,
            client,
            runner,
            scheduler,
            pollables,
        }
    }

    /// Make `pollable` loadable and register it
    pub async fn add(&self, pollable: ScriptedPollable) -> PollableMetaData {
        let pollable_ref = PollableRef::new(TYPE_NAME, pollable.id);
        self.loader.add(pollable);
        self.pollables.register(&pollable_ref).await.unwrap()
    }

    pub async fn meta(&self, id: i64) -> PollableMetaData {
        self.meta_repo.find_by_id(id).await.unwrap().unwrap()
    }

    /// Take the next job regardless of its run time
    pub async fn pop(&self) -> QueuedJob {
        let job = self.queue.pop_due(QUEUE, i64::MAX).await.unwrap().unwrap();
        self.queue.acknowledge(&job.id).await.unwrap();
        job
    }

    pub async fn queued(&self) -> i64 {
        self.queue.count(QUEUE).await.unwrap()
    }

    /// Pop and perform the next job
    pub async fn run_next(&self) -> PollJobOutcome {
        let job = self.pop().await;
        self.runner.perform(&job).await.unwrap()
    }
}

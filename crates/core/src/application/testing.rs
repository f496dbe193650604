// Shared wiring for application tests

use crate::application::guard::Guard;
use crate::application::poll_job::{JobUniqueness, PollJobClient, PollJobRunner};
use crate::application::registry::PollableRegistry;
use crate::application::retry::BackoffPolicy;
use crate::domain::{PollableConfig, PollableMetaData, PollableRef};
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_queue::mocks::InMemoryJobQueue;
use crate::port::meta_data_repository::mocks::InMemoryMetaDataRepository;
use crate::port::pollable::mocks::{ScriptedLoader, ScriptedPollable};
use crate::port::time_provider::mocks::MockTimeProvider;
use crate::port::unique_job_lock_repository::mocks::InMemoryUniqueJobLockRepository;
use crate::port::{InMemoryKeyedStore, JobQueue, PollableMetaDataRepository, QueuedJob, TimeProvider};
use std::sync::Arc;

pub const TYPE_NAME: &str = "Website";
pub const QUEUE: &str = "polling";

pub struct Harness {
    pub clock: Arc<MockTimeProvider>,
    pub meta_repo: Arc<InMemoryMetaDataRepository>,
    pub locks: Arc<InMemoryUniqueJobLockRepository>,
    pub queue: Arc<InMemoryJobQueue>,
    pub keyed_store: Arc<InMemoryKeyedStore>,
    pub loader: ScriptedLoader,
    pub registry: Arc<PollableRegistry>,
    pub uniqueness: Arc<JobUniqueness>,
    pub client: Arc<PollJobClient>,
    pub runner: Arc<PollJobRunner>,
}

impl Harness {
    /// Guard key taken from each scripted pollable
    pub fn new() -> Self {
        Self::with_config(
            PollableConfig::<ScriptedPollable>::builder()
                .guard_key_fn(|p: &ScriptedPollable| p.guard_key.clone())
                .build(),
        )
    }

    pub fn with_config(config: PollableConfig<ScriptedPollable>) -> Self {
        let clock = Arc::new(MockTimeProvider::new(1_700_000_000_000));
        let ids = Arc::new(SequentialIdProvider::new("job"));
        let meta_repo = Arc::new(InMemoryMetaDataRepository::new());
        let locks = Arc::new(InMemoryUniqueJobLockRepository::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let keyed_store = Arc::new(InMemoryKeyedStore::new(clock.clone()));
        let loader = ScriptedLoader::new();

        let mut registry = PollableRegistry::new();
        registry.register(TYPE_NAME, config, loader.clone());
        let registry = Arc::new(registry);

        let uniqueness = Arc::new(JobUniqueness::new(locks.clone(), clock.clone()));
        let client = Arc::new(PollJobClient::new(
            queue.clone(),
            Arc::clone(&uniqueness),
            Arc::clone(&registry),
            ids.clone(),
            clock.clone(),
        ));
        let guard = Arc::new(Guard::new(keyed_store.clone(), clock.clone(), ids));
        let runner = Arc::new(PollJobRunner::new(
            meta_repo.clone(),
            Arc::clone(&registry),
            guard,
            Arc::clone(&uniqueness),
            Arc::clone(&client),
            BackoffPolicy::default(),
            clock.clone(),
        ));

        Self {
            clock,
            meta_repo,
            locks,
            queue,
            keyed_store,
            loader,
            registry,
            uniqueness,
            client,
            runner,
        }
    }

    /// Make `pollable` loadable and give it a meta data row
    pub async fn add(&self, pollable: ScriptedPollable) -> PollableMetaData {
        let pollable_ref = PollableRef::new(TYPE_NAME, pollable.id);
        self.loader.add(pollable);
        self.meta_repo
            .insert(&pollable_ref, self.clock.now_millis())
            .await
            .unwrap()
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
}

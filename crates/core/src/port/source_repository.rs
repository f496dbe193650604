// Source Repository Port (Interface)

use crate::domain::{Fingerprint, PollableRef, Source};
use crate::error::Result;
use crate::port::transaction::TransactionalSourceRepository;
use async_trait::async_trait;

/// Read side of source persistence; writes go through transactions
#[async_trait]
pub trait SourceRepository: TransactionalSourceRepository {
    /// Find source by fingerprint
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<Source>>;

    /// All sources of a pollable, oldest first
    async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Vec<Source>>;

    /// Total number of stored sources
    async fn count(&self) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::transaction::{SourceRepositoryTransaction, Transaction};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    type Rows = Arc<Mutex<BTreeMap<Fingerprint, Source>>>;

    /// In-memory source repository with buffered transactions
    #[derive(Default)]
    pub struct InMemorySourceRepository {
        rows: Rows,
        fail_commits: Arc<Mutex<bool>>,
    }

    impl InMemorySourceRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every following commit fail (simulates an aborted transaction)
        pub fn fail_commits(&self, fail: bool) {
            *self.fail_commits.lock().unwrap() = fail;
        }
    }

    enum Change {
        Insert(Source),
        Delete(Fingerprint),
    }

    struct InMemoryTransaction {
        rows: Rows,
        fail_commits: Arc<Mutex<bool>>,
        changes: Vec<Change>,
    }

    impl InMemoryTransaction {
        fn visible(&self, fingerprint: &Fingerprint) -> bool {
            let mut present = self.rows.lock().unwrap().contains_key(fingerprint);
            for change in &self.changes {
                match change {
                    Change::Insert(s) if &s.fingerprint == fingerprint => present = true,
                    Change::Delete(f) if f == fingerprint => present = false,
                    _ => {}
                }
            }
            present
        }
    }

    #[async_trait]
    impl Transaction for InMemoryTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            if *self.fail_commits.lock().unwrap() {
                return Err(crate::error::AppError::Database(
                    "commit failed (simulated)".to_string(),
                ));
            }
            let mut rows = self.rows.lock().unwrap();
            for change in self.changes {
                match change {
                    Change::Insert(source) => {
                        rows.insert(source.fingerprint.clone(), source);
                    }
                    Change::Delete(fingerprint) => {
                        rows.remove(&fingerprint);
                    }
                }
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SourceRepositoryTransaction for InMemoryTransaction {
        async fn exists(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
            Ok(self.visible(fingerprint))
        }

        async fn insert(&mut self, source: &Source) -> Result<bool> {
            if self.visible(&source.fingerprint) {
                return Ok(false);
            }
            self.changes.push(Change::Insert(source.clone()));
            Ok(true)
        }

        async fn delete(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
            if !self.visible(fingerprint) {
                return Ok(false);
            }
            self.changes.push(Change::Delete(fingerprint.clone()));
            Ok(true)
        }
    }

    #[async_trait]
    impl TransactionalSourceRepository for InMemorySourceRepository {
        async fn begin_transaction(&self) -> Result<Box<dyn SourceRepositoryTransaction>> {
            Ok(Box::new(InMemoryTransaction {
                rows: Arc::clone(&self.rows),
                fail_commits: Arc::clone(&self.fail_commits),
                changes: Vec::new(),
            }))
        }
    }

    #[async_trait]
    impl SourceRepository for InMemorySourceRepository {
        async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<Source>> {
            Ok(self.rows.lock().unwrap().get(fingerprint).cloned())
        }

        async fn find_by_pollable(&self, pollable: &PollableRef) -> Result<Vec<Source>> {
            let mut sources: Vec<Source> = self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| &s.pollable == pollable)
                .cloned()
                .collect();
            sources.sort_by_key(|s| s.created_at);
            Ok(sources)
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.rows.lock().unwrap().len() as i64)
        }
    }
}

// Keyed Store Port - shared key/value store with per-key expiry (guard locks)

use crate::error::Result;
use crate::port::TimeProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Atomic set-if-absent store with expiring keys.
///
/// Every entry carries a holder token; renew and delete only act when the
/// caller still holds the entry.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Create `key` owned by `holder` unless a live entry exists
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Absolute expiry (epoch ms) of a live entry
    async fn expiry(&self, key: &str) -> Result<Option<i64>>;

    /// Reset the TTL of an entry still owned by `holder`
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Remove an entry still owned by `holder`
    async fn delete(&self, key: &str, holder: &str) -> Result<bool>;
}

struct Entry {
    holder: String,
    expires_at: i64,
}

/// Process-local keyed store.
///
/// Used when no shared store is configured; guards then only coordinate
/// workers of the same process.
pub struct InMemoryKeyedStore {
    entries: Mutex<HashMap<String, Entry>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryKeyedStore {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            time_provider,
        }
    }

    fn deadline(&self, ttl: Duration) -> i64 {
        self.time_provider.now_millis() + ttl.as_millis() as i64
    }
}

#[async_trait]
impl KeyedStore for InMemoryKeyedStore {
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                holder: holder.to_string(),
                expires_at: self.deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn expiry(&self, key: &str) -> Result<Option<i64>> {
        let now = self.time_provider.now_millis();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .map(|e| e.expires_at)
            .filter(|expires_at| *expires_at > now))
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.holder == holder && entry.expires_at > now => {
                entry.expires_at = deadline;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str, holder: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.holder == holder) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[tokio::test]
    async fn test_set_if_absent_respects_live_entries() {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = InMemoryKeyedStore::new(clock.clone());

        assert!(store.set_if_absent("k", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.expiry("k").await.unwrap(), Some(11_000));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.expiry("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_holder_may_renew_or_delete() {
        let clock = Arc::new(MockTimeProvider::new(0));
        let store = InMemoryKeyedStore::new(clock.clone());
        store.set_if_absent("k", "a", Duration::from_secs(10)).await.unwrap();

        assert!(!store.renew("k", "b", Duration::from_secs(60)).await.unwrap());
        assert!(!store.delete("k", "b").await.unwrap());

        assert!(store.renew("k", "a", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.expiry("k").await.unwrap(), Some(60_000));

        assert!(store.delete("k", "a").await.unwrap());
        assert_eq!(store.expiry("k").await.unwrap(), None);
    }
}

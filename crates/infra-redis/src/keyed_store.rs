// Redis KeyedStore Implementation

use crate::error::map_redis_error;
use async_trait::async_trait;
use perennial_core::error::{AppError, Result};
use perennial_core::port::{KeyedStore, TimeProvider};
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix of every guard key written by this store
pub const DEFAULT_NAMESPACE: &str = "perennial:guard";

// Owner-checked operations: a holder never touches an entry it lost to expiry
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Guard locks in Redis, shared by every process pointing at the same server.
///
/// Acquisition is a single `SET key holder NX PX ttl`; Redis expiry is the
/// lease timeout.
#[derive(Clone)]
pub struct RedisKeyedStore {
    connection_manager: ConnectionManager,
    namespace: String,
    time_provider: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for RedisKeyedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyedStore")
            .field("connection_manager", &"ConnectionManager")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RedisKeyedStore {
    /// Connect to `redis_url`
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `namespace` - Prefix for guard keys
    /// * `time_provider` - Converts remaining TTLs into absolute expiry times
    pub async fn connect(
        redis_url: &str,
        namespace: impl Into<String>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Config(format!("invalid redis url: {}", e)))?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;

        let namespace = namespace.into();
        debug!(url = %redact_url(redis_url), namespace = %namespace, "Redis keyed store connected");

        Ok(Self {
            connection_manager,
            namespace,
            time_provider,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl KeyedStore for RedisKeyedStore {
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(reply.is_some())
    }

    async fn expiry(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection_manager.clone();
        let remaining: i64 = redis::cmd("PTTL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        // -2: no key, -1: key without expiry (never written by this store)
        if remaining < 0 {
            return Ok(None);
        }
        Ok(Some(self.time_provider.now_millis() + remaining))
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(self.namespaced(key))
            .arg(holder)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(renewed == 1)
    }

    async fn delete(&self, key: &str, holder: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let deleted: i64 = Script::new(DELETE_SCRIPT)
            .key(self.namespaced(key))
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(deleted == 1)
    }
}

/// PX rejects zero
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Redact credentials from a Redis URL for logging
fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let prefix = &url[..=colon_pos];
            let suffix = &url[at_pos..];
            return format!("{}***{}", prefix, suffix);
        }
    }
    url.to_string()
}

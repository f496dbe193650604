// Perennial Infrastructure - Redis Adapter
// Implements: KeyedStore (guard locks shared across processes)

mod error;
mod keyed_store;

pub use error::map_redis_error;
pub use keyed_store::{RedisKeyedStore, DEFAULT_NAMESPACE};

// redis::RedisError -> AppError mapping

use perennial_core::error::AppError;

/// Convert redis::RedisError to AppError.
///
/// Connection-level failures keep their kind in the message so guard logs
/// tell a dropped connection apart from a script error.
pub fn map_redis_error(err: redis::RedisError) -> AppError {
    if err.is_connection_dropped() || err.is_connection_refusal() {
        AppError::KeyedStore(format!("Redis connection failed: {}", err))
    } else if err.is_timeout() {
        AppError::KeyedStore(format!("Redis timed out: {}", err))
    } else {
        AppError::KeyedStore(err.to_string())
    }
}

//! Redis wiring for the feed caches

use anyhow::{Context, Result};
use feed_cache::{RedisBackend, SharedBackend};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Open the cache backend without waiting for Redis.
///
/// Only a malformed URL fails. While Redis is unreachable every cache call
/// fails fast and the feeds are served from PostgreSQL; the pool connects on
/// the first call after Redis comes back.
pub async fn open_backend(redis_url: &str, ping_timeout: Duration) -> Result<(RedisPool, SharedBackend)> {
    let redis = RedisPool::open(redis_url).context("Invalid REDIS_URL")?;

    match redis.ping(ping_timeout).await {
        Ok(()) => info!(addr = %redis.addr(), "Redis reachable"),
        Err(e) => warn!(
            addr = %redis.addr(),
            error = %e,
            "Redis not answering at startup, serving from PostgreSQL until it returns"
        ),
    }

    let backend: SharedBackend = Arc::new(RedisBackend::from_pool(&redis));
    Ok((redis, backend))
}

//! Shared Redis connection pool.
//!
//! One pool per process, read-many / write-many, sized by
//! `REDIS_POOL_MAX_CONNECTIONS`. Both the stream client and the cache borrow
//! connections from it; HTTP handlers and workers never hold a connection
//! across an await point longer than a single broker call.

use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{Error, Result};

pub type BrokerPool = deadpool_redis::Pool;

/// Build the process-wide connection pool from the broker config.
pub fn build_pool(config: &RedisConfig) -> Result<BrokerPool> {
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_max_connections);
    pool_config.timeouts.create = Some(config.socket_connect_timeout);
    pool_config.timeouts.wait = config.socket_timeout;

    let mut cfg = deadpool_redis::Config::from_url(config.connection_url());
    cfg.pool = Some(pool_config);

    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| Error::Unavailable(e.to_string()))
}

/// Low-timeout liveness probe used by health endpoints and startup checks.
pub async fn ping(pool: &BrokerPool, deadline: Duration) -> Result<()> {
    let mut conn = pool.get().await?;
    let _: String = tokio::time::timeout(deadline, async {
        redis::cmd("PING").query_async(&mut conn).await
    })
    .await??;
    Ok(())
}

//! Cluster-State Cache
//!
//! Keyed blob store for cluster descriptors, sharing the broker pool.
//! Keys follow `{namespace}:pets:{pet_id}:cluster`; values are the JSON
//! serialization of [`ClusterDescriptor`]. `put` is an atomic full replace
//! with an absolute TTL; a missing entry is a first-class `None`, never an
//! error.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use pawhouse_core::ClusterDescriptor;

use crate::error::Result;
use crate::pool::BrokerPool;

/// Cache operations for per-pet cluster state.
#[async_trait]
pub trait StateCache: Send + Sync {
    /// Atomically replace the descriptor for its pet with the given TTL.
    async fn put(&self, descriptor: &ClusterDescriptor, ttl: Duration) -> Result<()>;

    /// Fetch the cached descriptor; `None` when missing or expired.
    async fn get(&self, pet_id: &str) -> Result<Option<ClusterDescriptor>>;

    /// Drop the cached descriptor. Returns whether a value was removed so
    /// callers can distinguish `removed` from `noop`.
    async fn delete(&self, pet_id: &str) -> Result<bool>;

    /// Broker liveness probe.
    async fn ping(&self) -> Result<()>;
}

/// Redis implementation of [`StateCache`].
pub struct RedisStateCache {
    pool: BrokerPool,
    namespace: String,
    op_timeout: Duration,
}

impl RedisStateCache {
    pub fn new(pool: BrokerPool, namespace: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            op_timeout,
        }
    }

    fn key(&self, pet_id: &str) -> String {
        cluster_key(&self.namespace, pet_id)
    }
}

/// Cache key for a pet's cluster state.
pub fn cluster_key(namespace: &str, pet_id: &str) -> String {
    format!("{namespace}:pets:{pet_id}:cluster")
}

#[async_trait]
impl StateCache for RedisStateCache {
    async fn put(&self, descriptor: &ClusterDescriptor, ttl: Duration) -> Result<()> {
        let key = self.key(&descriptor.pet_id);
        let body = descriptor.to_json()?;
        let mut conn = self.pool.get().await?;
        let _: () = tokio::time::timeout(self.op_timeout, async {
            conn.set_ex(&key, body, ttl.as_secs()).await
        })
        .await??;
        Ok(())
    }

    async fn get(&self, pet_id: &str) -> Result<Option<ClusterDescriptor>> {
        let key = self.key(pet_id);
        let mut conn = self.pool.get().await?;
        let raw: Option<String> =
            tokio::time::timeout(self.op_timeout, async { conn.get(&key).await }).await??;
        match raw {
            None => Ok(None),
            Some(body) => Ok(Some(ClusterDescriptor::from_json(&body)?)),
        }
    }

    async fn delete(&self, pet_id: &str) -> Result<bool> {
        let key = self.key(pet_id);
        let mut conn = self.pool.get().await?;
        let removed: i64 =
            tokio::time::timeout(self.op_timeout, async { conn.del(&key).await }).await??;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        crate::pool::ping(&self.pool, self.op_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_key_format() {
        assert_eq!(
            cluster_key("media.clusters", "pet-42"),
            "media.clusters:pets:pet-42:cluster"
        );
    }

    #[test]
    fn test_cluster_key_is_pet_scoped() {
        assert_ne!(
            cluster_key("media.clusters", "a"),
            cluster_key("media.clusters", "b")
        );
    }
}

//! Worker tuning knobs, filled in from the server crate's typed settings.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique consumer name within the shared group.
    pub consumer_name: String,
    /// Max messages per blocking group read (`CLUSTER_READ_COUNT`).
    pub read_count: usize,
    /// Server-side block on the group read (`CLUSTER_READ_TIMEOUT_MS`).
    pub read_block: Duration,
    /// Idle threshold before a pending message may be claimed
    /// (`CLUSTER_RETRY_IDLE_MS`).
    pub retry_idle: Duration,
    /// Delivery attempts before dead-lettering (`CLUSTER_MAX_ATTEMPTS`).
    pub max_attempts: u32,
    /// Backpressure gate: skip new reads while this many messages are held
    /// but not acked by this consumer.
    pub max_pending: usize,
    /// Run a reclaim pass every this many ticks (also runs on empty reads).
    pub reclaim_every: u64,
    /// Page size for idle-claim pagination.
    pub claim_page_size: usize,
    /// TTL applied to every cache write (`CLUSTER_TTL_SECONDS`).
    pub cache_ttl: Duration,
    /// Consecutive broker-unavailable failures tolerated before the worker
    /// gives up and the process restarts.
    pub max_unavailable: u32,
    /// Initial backoff after a broker-unavailable failure; doubles up to
    /// `backoff_max`.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "media-clustering-worker".to_string(),
            read_count: 16,
            read_block: Duration::from_millis(5000),
            retry_idle: Duration::from_millis(60_000),
            max_attempts: 5,
            max_pending: 64,
            reclaim_every: 10,
            claim_page_size: 16,
            cache_ttl: Duration::from_secs(86_400),
            max_unavailable: 10,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Config for worker replica `index`, suffixing the consumer name so
    /// every worker owns a unique name within the group.
    pub fn for_replica(&self, index: usize) -> Self {
        let mut config = self.clone();
        config.consumer_name = format!("{}-{}", self.consumer_name, index);
        config
    }
}

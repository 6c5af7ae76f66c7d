//! Stream Client
//!
//! Thin wrapper over the Redis stream primitives the worker protocol needs:
//! group creation, append with trim, blocking group read, idle-claim, ack
//! and dead-lettering. Exposed behind the [`JobStream`] trait so the worker
//! loop can run against an in-memory fake in tests.
//!
//! ## Delivery Semantics
//! - `read_group` with the `">"` cursor only ever yields never-delivered
//!   messages; a block timeout is an empty slice, not an error.
//! - `claim_idle` transfers messages idle longer than the threshold to the
//!   calling consumer and bumps the broker's delivery counter.
//! - `ack` is issued exactly once per successful processing, always after
//!   the cache write.
//! - `dead_letter` copies the original entry to the dead-letter stream with
//!   `reason` and `attempts` fields added, then acks the original id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamInfoGroupsReply, StreamMaxlen,
    StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;

use pawhouse_core::Job;

use crate::config::StreamConfig;
use crate::error::Result;
use crate::pool::BrokerPool;

/// A raw stream entry: broker-assigned id plus the flat field map.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    /// Decode the entry into a [`Job`]; failures are routed to the
    /// dead-letter stream with reason `"decode"`.
    pub fn decode(&self) -> pawhouse_core::Result<Job> {
        Job::from_fields(&self.fields)
    }
}

/// Stream operations the worker and the enqueue endpoint depend on.
#[async_trait]
pub trait JobStream: Send + Sync {
    /// Create the stream and consumer group if absent; anchored at `$` so a
    /// fresh group only sees new messages. Succeeds silently when the group
    /// already exists.
    async fn ensure_group(&self) -> Result<()>;

    /// Append a job to the stream, trimming to the configured `MAXLEN`.
    /// Returns the broker-assigned message id.
    async fn append(&self, job: &Job) -> Result<String>;

    /// Blocking read of never-delivered messages for this consumer.
    /// Returns an empty vec on block timeout.
    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>>;

    /// Non-blocking read of this consumer's still-pending backlog (the
    /// `"0"` cursor): messages delivered to it before a crash or restart.
    async fn read_pending_backlog(
        &self,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>>;

    /// Claim messages idle longer than `min_idle`, paginating from `start`.
    /// Returns the claimed batch and the cursor for the next call.
    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> Result<(Vec<StreamMessage>, String)>;

    /// Acknowledge one processed message.
    async fn ack(&self, message_id: &str) -> Result<()>;

    /// Copy a message to the dead-letter stream with `reason` and
    /// `attempts` added, then acknowledge the original.
    async fn dead_letter(
        &self,
        message: &StreamMessage,
        reason: &str,
        attempts: u32,
    ) -> Result<()>;

    /// Number of messages held-but-not-acked by `consumer`, capped at
    /// `limit`. Drives the backpressure gate.
    async fn pending_count(&self, consumer: &str, limit: usize) -> Result<usize>;

    /// Whether the configured consumer group exists on the stream.
    async fn group_ready(&self) -> Result<bool>;
}

/// Redis implementation of [`JobStream`] on the shared pool.
pub struct RedisJobStream {
    pool: BrokerPool,
    config: StreamConfig,
    op_timeout: Duration,
}

impl RedisJobStream {
    pub fn new(pool: BrokerPool, config: StreamConfig, op_timeout: Duration) -> Self {
        Self {
            pool,
            config,
            op_timeout,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    async fn append_fields(
        &self,
        stream_key: &str,
        fields: &[(String, String)],
    ) -> Result<String> {
        let mut conn = self.pool.get().await?;
        let id: String = tokio::time::timeout(self.op_timeout, async {
            if self.config.maxlen > 0 {
                let maxlen = if self.config.approximate_trim {
                    StreamMaxlen::Approx(self.config.maxlen)
                } else {
                    StreamMaxlen::Equals(self.config.maxlen)
                };
                conn.xadd_maxlen(stream_key, maxlen, "*", fields).await
            } else {
                conn.xadd(stream_key, "*", fields).await
            }
        })
        .await??;
        Ok(id)
    }
}

#[async_trait]
impl JobStream for RedisJobStream {
    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let created: redis::RedisResult<String> = tokio::time::timeout(self.op_timeout, async {
            conn.xgroup_create_mkstream(
                &self.config.stream_key,
                &self.config.consumer_group,
                "$",
            )
            .await
        })
        .await?;

        match created {
            Ok(_) => Ok(()),
            // Racing workers all try to create the group at startup.
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn append(&self, job: &Job) -> Result<String> {
        let fields = job.to_fields()?;
        self.append_fields(&self.config.stream_key, &fields).await
    }

    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.pool.get().await?;
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        // The outer deadline must outlast the server-side block.
        let reply: StreamReadReply = tokio::time::timeout(block + self.op_timeout, async {
            conn.xread_options(&[&self.config.stream_key], &[">"], &options)
                .await
        })
        .await??;

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(to_message)
            .collect())
    }

    async fn read_pending_backlog(
        &self,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.pool.get().await?;
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer)
            .count(count);

        let reply: StreamReadReply = tokio::time::timeout(self.op_timeout, async {
            conn.xread_options(&[&self.config.stream_key], &["0"], &options)
                .await
        })
        .await??;

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(to_message)
            .collect())
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> Result<(Vec<StreamMessage>, String)> {
        let mut conn = self.pool.get().await?;
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = tokio::time::timeout(self.op_timeout, async {
            conn.xautoclaim_options(
                &self.config.stream_key,
                &self.config.consumer_group,
                consumer,
                min_idle.as_millis() as usize,
                start,
                options,
            )
            .await
        })
        .await??;

        let claimed = reply.claimed.into_iter().map(to_message).collect();
        Ok((claimed, reply.next_stream_id))
    }

    async fn ack(&self, message_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = tokio::time::timeout(self.op_timeout, async {
            conn.xack(
                &self.config.stream_key,
                &self.config.consumer_group,
                &[message_id],
            )
            .await
        })
        .await??;
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &StreamMessage,
        reason: &str,
        attempts: u32,
    ) -> Result<()> {
        let mut fields: Vec<(String, String)> = message
            .fields
            .iter()
            .filter(|(key, _)| key.as_str() != "reason" && key.as_str() != "attempts")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.push(("reason".to_string(), reason.to_string()));
        fields.push(("attempts".to_string(), attempts.to_string()));
        fields.push(("origin_id".to_string(), message.id.clone()));

        self.append_fields(&self.config.dead_letter_stream, &fields)
            .await?;
        self.ack(&message.id).await
    }

    async fn pending_count(&self, consumer: &str, limit: usize) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let reply: StreamPendingCountReply = tokio::time::timeout(self.op_timeout, async {
            conn.xpending_consumer_count(
                &self.config.stream_key,
                &self.config.consumer_group,
                "-",
                "+",
                limit,
                consumer,
            )
            .await
        })
        .await??;
        Ok(reply.ids.len())
    }

    async fn group_ready(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: StreamInfoGroupsReply = tokio::time::timeout(self.op_timeout, async {
            conn.xinfo_groups(&self.config.stream_key).await
        })
        .await??;
        Ok(reply
            .groups
            .iter()
            .any(|group| group.name == self.config.consumer_group))
    }
}

fn to_message(entry: StreamId) -> StreamMessage {
    let fields = entry
        .map
        .iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|decoded| (key.clone(), decoded))
        })
        .collect();
    StreamMessage {
        id: entry.id,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawhouse_core::{Job, JobPayload};
    use std::collections::BTreeMap;

    #[test]
    fn test_stream_message_decode() {
        let job = Job::new(
            "pet-7",
            Some("job-7".to_string()),
            None,
            false,
            JobPayload::default(),
            BTreeMap::new(),
        );
        let message = StreamMessage {
            id: "1-0".to_string(),
            fields: job.to_fields().unwrap().into_iter().collect(),
        };
        let decoded = message.decode().unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_stream_message_decode_poison() {
        let message = StreamMessage {
            id: "1-0".to_string(),
            fields: HashMap::from([("payload".to_string(), "{not json".to_string())]),
        };
        assert!(message.decode().is_err());
    }
}

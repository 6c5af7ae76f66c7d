//! The consumer loop.
//!
//! ## Per-Tick Protocol
//! 1. Read the broker-reported pending count for this consumer; above
//!    `max_pending` the new-message read is skipped (backpressure) and only
//!    the reclaim pass runs.
//! 2. Blocking group read with the `">"` cursor; each message is decoded,
//!    dispatched to the strategy, written to the cache and then acked. The
//!    cache write strictly precedes the ack: a crash in between causes a
//!    redelivery that overwrites the cache with an identical descriptor.
//! 3. Every `reclaim_every` ticks, and on every empty read, messages idle
//!    longer than `retry_idle` are claimed. The claimed envelope's
//!    `attempts` counter is bumped; at `max_attempts` the message is
//!    dead-lettered with reason `"max_attempts"`, otherwise it is
//!    reprocessed. A repeated failure persists the bumped counter by
//!    re-appending the envelope and acking the claimed id.
//!
//! ## Failure Policy
//! Message-level errors never stop the loop. Transient broker errors leave
//! messages pending for the reclaim path. Broker-unavailable errors back
//! off exponentially; after `max_unavailable` consecutive failures the
//! worker transitions to `Failed` and `run` returns the error so the
//! process can restart under its supervisor.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use pawhouse_broker::{JobStream, StateCache, StreamMessage};
use pawhouse_core::{ClusterStrategy, Job};
use pawhouse_observability::metrics;

use crate::config::WorkerConfig;
use crate::error::Result;

/// Lifecycle states of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Consuming,
    Reclaiming,
    Draining,
    Stopped,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Consuming => "consuming",
            Self::Reclaiming => "reclaiming",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single consumer inside the shared group.
pub struct Worker {
    stream: Arc<dyn JobStream>,
    cache: Arc<dyn StateCache>,
    strategy: Arc<dyn ClusterStrategy>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
    ticks: u64,
}

impl Worker {
    pub fn new(
        stream: Arc<dyn JobStream>,
        cache: Arc<dyn StateCache>,
        strategy: Arc<dyn ClusterStrategy>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            cache,
            strategy,
            config,
            shutdown,
            state: WorkerState::Starting,
            ticks: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run until shutdown is signalled or the broker stays unreachable past
    /// the retry budget.
    pub async fn run(mut self) -> Result<()> {
        self.transition(WorkerState::Starting);

        let mut streak = 0u32;
        while !*self.shutdown.borrow() {
            match self.stream.ensure_group().await {
                Ok(()) => break,
                Err(err) => {
                    streak += 1;
                    if streak >= self.config.max_unavailable {
                        self.transition(WorkerState::Failed);
                        return Err(err.into());
                    }
                    tracing::warn!(
                        consumer = %self.config.consumer_name,
                        error = %err,
                        "consumer group not ready; backing off"
                    );
                    self.backoff_sleep(streak).await;
                }
            }
        }

        // Drain our own pending backlog once: messages this consumer name
        // held when a previous incarnation crashed. Whatever fails here is
        // picked up by the regular reclaim path.
        match self
            .stream
            .read_pending_backlog(&self.config.consumer_name, self.config.read_count)
            .await
        {
            Ok(backlog) if !backlog.is_empty() => {
                tracing::info!(
                    consumer = %self.config.consumer_name,
                    count = backlog.len(),
                    "draining pending backlog from previous run"
                );
                for message in &backlog {
                    self.handle_fresh(message).await;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    consumer = %self.config.consumer_name,
                    error = %err,
                    "could not read pending backlog; reclaim will cover it"
                );
            }
        }

        let mut streak = 0u32;
        while !*self.shutdown.borrow() {
            match self.tick().await {
                Ok(()) => streak = 0,
                Err(err) if err.is_transient() => {
                    streak = 0;
                    tracing::warn!(
                        consumer = %self.config.consumer_name,
                        error = %err,
                        "transient broker error; pending messages will be reclaimed"
                    );
                }
                Err(err) => {
                    streak += 1;
                    tracing::error!(
                        consumer = %self.config.consumer_name,
                        error = %err,
                        streak,
                        "broker unavailable"
                    );
                    if streak >= self.config.max_unavailable {
                        self.transition(WorkerState::Failed);
                        return Err(err.into());
                    }
                    self.backoff_sleep(streak).await;
                }
            }
        }

        // In-flight messages were completed inside the last tick; nothing
        // is held back, so draining amounts to not issuing further reads.
        self.transition(WorkerState::Draining);
        self.transition(WorkerState::Stopped);
        Ok(())
    }

    /// One protocol tick: backpressure check, batch read, reclaim pass.
    pub async fn tick(&mut self) -> pawhouse_broker::Result<()> {
        self.ticks += 1;
        let consumer = self.config.consumer_name.clone();

        let pending = self
            .stream
            .pending_count(&consumer, self.config.max_pending + 1)
            .await?;
        metrics::WORKER_PENDING
            .with_label_values(&[&consumer])
            .set(pending as i64);

        let mut batch_was_empty = true;
        if pending <= self.config.max_pending {
            self.transition(WorkerState::Consuming);
            let batch = self
                .stream
                .read_group(&consumer, self.config.read_count, self.config.read_block)
                .await?;
            batch_was_empty = batch.is_empty();
            for message in &batch {
                self.handle_fresh(message).await;
            }
        } else {
            tracing::warn!(
                consumer = %consumer,
                pending,
                max_pending = self.config.max_pending,
                "backpressure: skipping new reads this tick"
            );
        }

        if batch_was_empty || self.ticks % self.config.reclaim_every == 0 {
            self.transition(WorkerState::Reclaiming);
            self.reclaim_pass().await?;
        }

        Ok(())
    }

    /// First-delivery path: decode, process, and on transient failure leave
    /// the message pending for the reclaim pass.
    async fn handle_fresh(&self, message: &StreamMessage) {
        let started = Instant::now();
        let job = match message.decode() {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %err,
                    "undecodable job; dead-lettering"
                );
                self.dead_letter(message, "decode", envelope_attempts(message))
                    .await;
                return;
            }
        };

        match self.write_and_ack(message, &job).await {
            Ok(()) => self.observe_processed(&job, started),
            Err(err) => {
                metrics::JOB_FAILURES_TOTAL
                    .with_label_values(&[failure_kind(&err)])
                    .inc();
                metrics::JOB_PROCESSING_SECONDS
                    .with_label_values(&["failed"])
                    .observe(started.elapsed().as_secs_f64());
                tracing::warn!(
                    message_id = %message.id,
                    job_id = %job.job_id,
                    pet_id = %job.pet_id,
                    error = %err,
                    "job failed; leaving pending for reclaim"
                );
            }
        }
    }

    /// Reclaim messages idle past the threshold, enforcing the attempts
    /// budget, paginating until the scan cursor wraps.
    async fn reclaim_pass(&self) -> pawhouse_broker::Result<()> {
        let consumer = &self.config.consumer_name;
        let mut start = "0-0".to_string();
        loop {
            let (claimed, next_start) = self
                .stream
                .claim_idle(
                    consumer,
                    self.config.retry_idle,
                    &start,
                    self.config.claim_page_size,
                )
                .await?;
            if claimed.is_empty() {
                break;
            }

            for message in &claimed {
                metrics::RECLAIMED_TOTAL.inc();
                let attempts = envelope_attempts(message) + 1;

                if attempts >= self.config.max_attempts {
                    tracing::error!(
                        message_id = %message.id,
                        attempts,
                        "retry budget exhausted; dead-lettering"
                    );
                    self.dead_letter(message, "max_attempts", attempts).await;
                    continue;
                }

                let started = Instant::now();
                let job = match message.decode() {
                    Ok(job) => job,
                    Err(err) => {
                        tracing::error!(
                            message_id = %message.id,
                            error = %err,
                            "undecodable reclaimed job; dead-lettering"
                        );
                        self.dead_letter(message, "decode", attempts).await;
                        continue;
                    }
                };

                match self.write_and_ack(message, &job).await {
                    Ok(()) => self.observe_processed(&job, started),
                    Err(err) => {
                        metrics::JOB_FAILURES_TOTAL
                            .with_label_values(&[failure_kind(&err)])
                            .inc();
                        tracing::warn!(
                            message_id = %message.id,
                            job_id = %job.job_id,
                            pet_id = %job.pet_id,
                            attempts,
                            error = %err,
                            "reclaimed job failed; persisting bumped attempts"
                        );
                        self.persist_attempts(message, &job, attempts).await;
                    }
                }
            }

            start = next_start;
            if start == "0-0" {
                break;
            }
        }
        Ok(())
    }

    /// Strategy, cache write, then ack - in that order.
    async fn write_and_ack(
        &self,
        message: &StreamMessage,
        job: &Job,
    ) -> pawhouse_broker::Result<()> {
        let descriptor = self
            .strategy
            .cluster(&job.pet_id, &job.payload, job.emitted_at);
        self.cache.put(&descriptor, self.config.cache_ttl).await?;
        self.stream.ack(&message.id).await?;
        Ok(())
    }

    /// Make the bumped attempts counter durable: re-append the envelope and
    /// ack the claimed id. If the append fails the claimed message simply
    /// stays pending and a later reclaim bumps it again.
    async fn persist_attempts(&self, message: &StreamMessage, job: &Job, attempts: u32) {
        let bumped = job.with_attempts(attempts);
        match self.stream.append(&bumped).await {
            Ok(_) => {
                if let Err(err) = self.stream.ack(&message.id).await {
                    tracing::warn!(
                        message_id = %message.id,
                        error = %err,
                        "failed to ack after re-append; duplicate delivery is idempotent"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %err,
                    "failed to re-append bumped envelope; message stays pending"
                );
            }
        }
    }

    async fn dead_letter(&self, message: &StreamMessage, reason: &str, attempts: u32) {
        match self.stream.dead_letter(message, reason, attempts).await {
            Ok(()) => {
                metrics::DEAD_LETTER_TOTAL.with_label_values(&[reason]).inc();
            }
            Err(err) => {
                // The original stays pending and will be claimed again.
                tracing::error!(
                    message_id = %message.id,
                    reason,
                    error = %err,
                    "dead-letter append failed"
                );
            }
        }
    }

    fn observe_processed(&self, job: &Job, started: Instant) {
        let trigger = if job.force { "forced" } else { "normal" };
        metrics::JOBS_PROCESSED_TOTAL
            .with_label_values(&[trigger])
            .inc();
        metrics::JOB_PROCESSING_SECONDS
            .with_label_values(&["processed"])
            .observe(started.elapsed().as_secs_f64());
        tracing::info!(
            consumer = %self.config.consumer_name,
            job_id = %job.job_id,
            pet_id = %job.pet_id,
            reason = job.reason.as_deref().unwrap_or(""),
            forced = job.force,
            latency_ms = started.elapsed().as_millis() as u64,
            "cluster state updated"
        );
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            tracing::debug!(
                consumer = %self.config.consumer_name,
                from = %self.state,
                to = %next,
                "worker state transition"
            );
            self.state = next;
        }
    }

    async fn backoff_sleep(&mut self, streak: u32) {
        let factor = 2u32.saturating_pow(streak.saturating_sub(1).min(16));
        let delay = self
            .config
            .backoff_initial
            .saturating_mul(factor)
            .min(self.config.backoff_max);
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// The delivery counter carried in the envelope; absent or malformed reads
/// as zero so poison entries still flow through the retry budget.
fn envelope_attempts(message: &StreamMessage) -> u32 {
    message
        .fields
        .get("attempts")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

fn failure_kind(err: &pawhouse_broker::Error) -> &'static str {
    if err.is_transient() {
        "transient"
    } else {
        "unavailable"
    }
}

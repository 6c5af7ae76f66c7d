//! Worker pool: N parallel consumers with unique names in the shared group.
//!
//! Workers never coordinate with one another; the broker's consumer group
//! is the only distribution mechanism. The pool only fans out the shutdown
//! signal and enforces the drain grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use pawhouse_broker::{JobStream, StateCache};
use pawhouse_core::ClusterStrategy;

use crate::config::WorkerConfig;
use crate::worker::Worker;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    fatal_rx: watch::Receiver<bool>,
    grace: Duration,
}

impl WorkerPool {
    /// Spawn `replicas` workers as background tasks.
    pub fn start(
        stream: Arc<dyn JobStream>,
        cache: Arc<dyn StateCache>,
        strategy: Arc<dyn ClusterStrategy>,
        base_config: WorkerConfig,
        replicas: usize,
        grace: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, fatal_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(replicas);
        for index in 0..replicas {
            let worker = Worker::new(
                stream.clone(),
                cache.clone(),
                strategy.clone(),
                base_config.for_replica(index),
                shutdown_rx.clone(),
            );
            let fatal_tx = fatal_tx.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = worker.run().await {
                    tracing::error!(error = %err, "worker terminated with fatal broker error");
                    let _ = fatal_tx.send(true);
                }
            }));
        }

        Self {
            handles,
            shutdown_tx,
            fatal_rx,
            grace,
        }
    }

    /// Receiver that flips to `true` when any worker reaches its `Failed`
    /// state; the server stops the HTTP surface and exits non-zero on it.
    pub fn fatal_receiver(&self) -> watch::Receiver<bool> {
        self.fatal_rx.clone()
    }

    /// Signal shutdown and wait for every worker to drain, aborting any
    /// that overrun the grace period.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let aborter = handle.abort_handle();
            if tokio::time::timeout(self.grace, handle).await.is_err() {
                tracing::warn!("worker did not drain within grace period; aborting");
                aborter.abort();
            }
        }
        tracing::info!("worker pool stopped");
    }
}

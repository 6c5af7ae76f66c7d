//! Pawhouse Media Clustering Server
//!
//! Main entry point for the media-clustering service: the internal HTTP
//! API, the worker pool consuming the cluster stream, and the Prometheus
//! exporter, all over one shared Redis pool.
//!
//! ## Configuration
//! All configuration is environment-driven; see `config.rs` for the
//! recognized variables. Logging is controlled via `RUST_LOG`.
//!
//! ## Lifecycle
//! Startup order: logging -> settings -> pool -> consumer group ->
//! metrics listener -> workers -> HTTP. On SIGINT/SIGTERM (or a worker
//! reaching its failed state) teardown runs in the reverse dependency
//! order: HTTP server first, then the workers drain within the grace
//! period, then the broker pool is dropped.
//!
//! ## Exit Codes
//! - `0` graceful stop
//! - `1` fatal broker-unreachable state after retry exhaustion
//! - `2` configuration error at startup

use std::sync::Arc;

use tokio::sync::watch;

use pawhouse_api::{create_router, AppState};
use pawhouse_broker::{build_pool, JobStream, RedisJobStream, RedisStateCache};
use pawhouse_core::HeuristicStrategy;
use pawhouse_observability::{exporter, metrics};
use pawhouse_server::Settings;
use pawhouse_worker::WorkerPool;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            std::process::exit(2);
        }
    };

    tracing::info!(
        app = %settings.app_name,
        environment = %settings.environment,
        "starting pawhouse media clustering"
    );

    match run(settings).await {
        Ok(()) => tracing::info!("shut down gracefully"),
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            std::process::exit(1);
        }
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    metrics::init();

    let pool = build_pool(&settings.redis)?;
    let op_timeout = settings.redis.op_timeout();
    tracing::info!(
        url = %settings.redis.connection_url_redacted(),
        pool_max_connections = settings.redis.pool_max_connections,
        healthcheck_interval_secs = settings.redis.healthcheck_interval.as_secs(),
        retry_on_timeout = settings.redis.retry_on_timeout,
        "broker pool ready"
    );

    let stream = Arc::new(RedisJobStream::new(
        pool.clone(),
        settings.stream.clone(),
        op_timeout,
    ));
    let cache = Arc::new(RedisStateCache::new(
        pool.clone(),
        settings.namespace.clone(),
        op_timeout,
    ));
    let strategy = Arc::new(HeuristicStrategy::new(settings.strategy_params()));

    // Create the stream and group up front so the HTTP surface can enqueue
    // before the first worker finishes starting. Workers retry on their own
    // if the broker is not up yet.
    if let Err(err) = stream.ensure_group().await {
        tracing::warn!(error = %err, "consumer group not ready at startup; workers will retry");
    }

    // Metrics exporter on its own listener.
    let (metrics_stop_tx, mut metrics_stop_rx) = watch::channel(false);
    let metrics_handle = if settings.metrics_enabled {
        let host = settings.metrics_host.clone();
        let port = settings.metrics_port;
        Some(tokio::spawn(async move {
            let shutdown = async move {
                while !*metrics_stop_rx.borrow() {
                    if metrics_stop_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            if let Err(err) = exporter::serve_metrics(&host, port, shutdown).await {
                tracing::error!(error = %err, "metrics exporter failed");
            }
        }))
    } else {
        None
    };

    // Worker fleet.
    let workers = WorkerPool::start(
        stream.clone(),
        cache.clone(),
        strategy,
        settings.worker_config(),
        settings.worker_replicas,
        settings.shutdown_grace,
    );
    let mut fatal_rx = workers.fatal_receiver();
    let fatal_check = workers.fatal_receiver();

    // HTTP surface; stops on OS signal or when a worker goes fatal.
    let router = create_router(
        AppState {
            stream: stream.clone(),
            cache: cache.clone(),
        },
        &settings.internal_token,
        settings.request_timeout,
    );

    let http_shutdown = async move {
        tokio::select! {
            signal = shutdown_signal() => {
                tracing::info!(signal, "received shutdown signal, stopping HTTP server");
            }
            _ = wait_fatal(&mut fatal_rx) => {
                tracing::error!("worker reached failed state, stopping HTTP server");
            }
        }
    };

    pawhouse_api::serve(router, &settings.http_host, settings.http_port, http_shutdown).await?;

    // HTTP is down; drain the workers, then stop the exporter. The broker
    // pool drops last when this function returns.
    workers.shutdown().await;
    let _ = metrics_stop_tx.send(true);
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    if *fatal_check.borrow() {
        return Err("worker terminated after broker retry exhaustion".into());
    }
    Ok(())
}

async fn wait_fatal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Stream / Worker Metrics
    // ============================================================================

    /// Jobs appended to the cluster stream
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_jobs_enqueued_total",
        "Total cluster jobs appended to the stream"
    ).expect("metric can be created");

    /// Jobs processed to a cache write + ack, by trigger (normal vs forced)
    pub static ref JOBS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pawhouse_jobs_processed_total", "Total cluster jobs processed"),
        &["trigger"]
    ).expect("metric can be created");

    /// Message-level failures, by kind (decode, transient, unavailable)
    pub static ref JOB_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pawhouse_job_failures_total", "Total job processing failures"),
        &["kind"]
    ).expect("metric can be created");

    /// Messages copied to the dead-letter stream, by reason
    pub static ref DEAD_LETTER_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pawhouse_dead_letter_total", "Total messages dead-lettered"),
        &["reason"]
    ).expect("metric can be created");

    /// Messages transferred from idle consumers via claim
    pub static ref RECLAIMED_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_reclaimed_total",
        "Total idle messages reclaimed"
    ).expect("metric can be created");

    /// Broker-reported pending entries per consumer
    pub static ref WORKER_PENDING: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pawhouse_worker_pending", "Pending entries held by a consumer"),
        &["consumer"]
    ).expect("metric can be created");

    /// End-to-end processing latency for one message
    pub static ref JOB_PROCESSING_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("pawhouse_job_processing_seconds", "Job processing latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["outcome"]
    ).expect("metric can be created");

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cluster-state reads that found a descriptor
    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_cache_hits_total",
        "Total cluster-state cache hits"
    ).expect("metric can be created");

    /// Cluster-state reads that found nothing
    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_cache_misses_total",
        "Total cluster-state cache misses"
    ).expect("metric can be created");

    /// Explicit invalidations that removed a descriptor
    pub static ref CACHE_INVALIDATIONS_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_cache_invalidations_total",
        "Total cluster-state invalidations"
    ).expect("metric can be created");

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Requests rejected by the internal token check
    pub static ref AUTH_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "pawhouse_auth_failures_total",
        "Total requests rejected with an invalid internal token"
    ).expect("metric can be created");

    /// Request latency by endpoint and outcome
    pub static ref HTTP_REQUEST_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("pawhouse_http_request_seconds", "HTTP request latency in seconds")
            .buckets(vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["endpoint", "outcome"]
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(JOBS_ENQUEUED_TOTAL.clone()))
            .expect("jobs_enqueued_total can be registered");
        REGISTRY
            .register(Box::new(JOBS_PROCESSED_TOTAL.clone()))
            .expect("jobs_processed_total can be registered");
        REGISTRY
            .register(Box::new(JOB_FAILURES_TOTAL.clone()))
            .expect("job_failures_total can be registered");
        REGISTRY
            .register(Box::new(DEAD_LETTER_TOTAL.clone()))
            .expect("dead_letter_total can be registered");
        REGISTRY
            .register(Box::new(RECLAIMED_TOTAL.clone()))
            .expect("reclaimed_total can be registered");
        REGISTRY
            .register(Box::new(WORKER_PENDING.clone()))
            .expect("worker_pending can be registered");
        REGISTRY
            .register(Box::new(JOB_PROCESSING_SECONDS.clone()))
            .expect("job_processing_seconds can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("cache_hits_total can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("cache_misses_total can be registered");
        REGISTRY
            .register(Box::new(CACHE_INVALIDATIONS_TOTAL.clone()))
            .expect("cache_invalidations_total can be registered");
        REGISTRY
            .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
            .expect("auth_failures_total can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_SECONDS.clone()))
            .expect("http_request_seconds can be registered");
    });
}

//! Cluster job enqueue endpoint

use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};

use pawhouse_core::Job;
use pawhouse_observability::metrics;

use crate::error::ApiError;
use crate::models::{ClusterJobRequest, StatusResponse};
use crate::AppState;

/// `POST /internal/cluster-jobs` - validate, assign a job id if absent,
/// append to the stream. Broker failure maps to `503`.
pub async fn submit_cluster_job(
    State(state): State<AppState>,
    Json(request): Json<ClusterJobRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let started = Instant::now();

    if request.pet_id.trim().is_empty() {
        return Err(ApiError::Validation("pet_id is required"));
    }

    let job = Job::new(
        request.pet_id,
        request.job_id,
        request.reason,
        request.force,
        request.payload,
        request.metadata,
    );

    let appended = state.stream.append(&job).await;
    let outcome = if appended.is_ok() { "accepted" } else { "error" };
    metrics::HTTP_REQUEST_SECONDS
        .with_label_values(&["cluster_jobs", outcome])
        .observe(started.elapsed().as_secs_f64());
    tracing::info!(
        pet_id = %job.pet_id,
        job_id = %job.job_id,
        reason = job.reason.as_deref().unwrap_or(""),
        outcome,
        latency_ms = started.elapsed().as_millis() as u64,
        "cluster job enqueue"
    );

    appended?;
    metrics::JOBS_ENQUEUED_TOTAL.inc();
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::accepted())))
}

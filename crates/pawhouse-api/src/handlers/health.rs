//! Health probes

use axum::{extract::State, Json};

use crate::error::ApiError;
use crate::models::StatusResponse;
use crate::AppState;

/// `GET /healthz` - liveness only; succeeds whenever the process runs.
pub async fn healthz() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// `GET /internal/health/redis` - broker ping plus a consumer-group probe
/// on the configured stream; `503` when either fails.
pub async fn redis_health(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.cache.ping().await.map_err(|err| {
        tracing::warn!(error = %err, "redis health: ping failed");
        ApiError::Unavailable
    })?;

    let group_ready = state.stream.group_ready().await.map_err(|err| {
        tracing::warn!(error = %err, "redis health: group probe failed");
        ApiError::Unavailable
    })?;
    if !group_ready {
        tracing::warn!("redis health: consumer group missing");
        return Err(ApiError::Unavailable);
    }

    Ok(Json(StatusResponse::ok()))
}

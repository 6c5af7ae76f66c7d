//! Cluster state read and invalidate endpoints

use std::collections::BTreeMap;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use pawhouse_core::ClusterDescriptor;
use pawhouse_observability::metrics;

use crate::error::ApiError;
use crate::models::StatusResponse;
use crate::AppState;

/// `GET /internal/pets/{pet_id}/clusters` - cached descriptor or `404`.
pub async fn get_clusters(
    State(state): State<AppState>,
    Path(pet_id): Path<String>,
) -> Result<Json<ClusterDescriptor>, ApiError> {
    let started = Instant::now();
    let found = state.cache.get(&pet_id).await;

    let outcome = match &found {
        Ok(Some(_)) => "hit",
        Ok(None) => "miss",
        Err(_) => "error",
    };
    metrics::HTTP_REQUEST_SECONDS
        .with_label_values(&["get_clusters", outcome])
        .observe(started.elapsed().as_secs_f64());
    tracing::info!(
        pet_id = %pet_id,
        outcome,
        latency_ms = started.elapsed().as_millis() as u64,
        "cluster state read"
    );

    match found? {
        Some(descriptor) => {
            metrics::CACHE_HITS_TOTAL.inc();
            Ok(Json(descriptor))
        }
        None => {
            metrics::CACHE_MISSES_TOTAL.inc();
            Err(ApiError::NotFound("cluster state not found"))
        }
    }
}

/// `GET /internal/pets/{pet_id}/hero-images` - cluster id to hero image id,
/// for rendering representatives without the full cluster payload.
pub async fn get_hero_images(
    State(state): State<AppState>,
    Path(pet_id): Path<String>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let started = Instant::now();
    let found = state.cache.get(&pet_id).await;

    let outcome = match &found {
        Ok(Some(_)) => "hit",
        Ok(None) => "miss",
        Err(_) => "error",
    };
    tracing::info!(
        pet_id = %pet_id,
        outcome,
        latency_ms = started.elapsed().as_millis() as u64,
        "hero images read"
    );

    match found? {
        Some(descriptor) => Ok(Json(descriptor.hero_images())),
        None => Err(ApiError::NotFound("cluster state not found")),
    }
}

/// `POST /internal/pets/{pet_id}/invalidate` - authoritative cache drop;
/// reports whether anything was removed.
pub async fn invalidate(
    State(state): State<AppState>,
    Path(pet_id): Path<String>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let started = Instant::now();
    let removed = state.cache.delete(&pet_id).await;

    let outcome = match &removed {
        Ok(true) => "removed",
        Ok(false) => "noop",
        Err(_) => "error",
    };
    metrics::HTTP_REQUEST_SECONDS
        .with_label_values(&["invalidate", outcome])
        .observe(started.elapsed().as_secs_f64());
    tracing::info!(
        pet_id = %pet_id,
        outcome,
        latency_ms = started.elapsed().as_millis() as u64,
        "cluster state invalidate"
    );

    let existed = removed?;
    if existed {
        metrics::CACHE_INVALIDATIONS_TOTAL.inc();
    }
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::removed(existed))))
}

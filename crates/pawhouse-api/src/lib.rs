//! Pawhouse internal HTTP surface.
//!
//! Token-authenticated endpoints for trusted callers: enqueue a cluster
//! job, read or invalidate a pet's cached cluster state, and probe health.
//! Handlers talk to the broker exclusively through the [`JobStream`] and
//! [`StateCache`] traits so the router can be exercised against in-memory
//! fakes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use pawhouse_broker::{JobStream, StateCache};

pub mod auth;
pub mod error;
pub mod handlers;
pub mod models;

pub use auth::InternalAuthLayer;
pub use error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub stream: Arc<dyn JobStream>,
    pub cache: Arc<dyn StateCache>,
}

/// Create the API router with all endpoints.
///
/// Every `/internal/*` route sits behind the token check; `/healthz` is the
/// unauthenticated liveness probe.
pub fn create_router(state: AppState, internal_token: &str, request_timeout: Duration) -> Router {
    let internal_routes = Router::new()
        .route("/cluster-jobs", post(handlers::jobs::submit_cluster_job))
        .route("/pets/:pet_id/clusters", get(handlers::clusters::get_clusters))
        .route(
            "/pets/:pet_id/hero-images",
            get(handlers::clusters::get_hero_images),
        )
        .route(
            "/pets/:pet_id/invalidate",
            post(handlers::clusters::invalidate),
        )
        .route("/health/redis", get(handlers::health::redis_health))
        .layer(InternalAuthLayer::new(internal_token))
        .with_state(state.clone());

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .nest("/internal", internal_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

/// Start the API server with a custom shutdown signal.
pub async fn serve(
    router: Router,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("internal API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("internal API shut down gracefully");
    Ok(())
}

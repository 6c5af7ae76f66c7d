//! Internal Token Authentication Middleware
//!
//! Tower layer validating the `X-Internal-Token` header on protected
//! routes. The check compares SHA-256 digests of the presented and
//! configured tokens, never the raw strings, and runs before any request
//! body is read. Missing or mismatching tokens yield `401` with a fixed
//! body.
//!
//! ## Usage
//!
//! ```ignore
//! let internal = Router::new()
//!     .route("/cluster-jobs", post(submit_cluster_job))
//!     .layer(InternalAuthLayer::new(&settings.internal_token));
//! ```

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::task::{Context, Poll};
use tower::{Layer, Service};

use pawhouse_observability::metrics;

pub const TOKEN_HEADER: &str = "x-internal-token";

/// Authentication layer for the internal router.
#[derive(Clone)]
pub struct InternalAuthLayer {
    expected: [u8; 32],
}

impl InternalAuthLayer {
    pub fn new(token: &str) -> Self {
        Self {
            expected: digest(token),
        }
    }
}

impl<S> Layer<S> for InternalAuthLayer {
    type Service = InternalAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InternalAuthMiddleware {
            inner,
            expected: self.expected,
        }
    }
}

/// Middleware service performing the token check.
#[derive(Clone)]
pub struct InternalAuthMiddleware<S> {
    inner: S,
    expected: [u8; 32],
}

impl<S> Service<Request> for InternalAuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Only the header is inspected here; the body is untouched until a
        // handler runs, so unauthenticated payloads are never parsed.
        let presented = request
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(digest);
        let expected = self.expected;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match presented {
                Some(presented) if presented == expected => inner.call(request).await,
                _ => {
                    metrics::AUTH_FAILURES_TOTAL.inc();
                    tracing::warn!("rejected request with invalid internal token");
                    Ok(AuthError::InvalidToken.into_response())
                }
            }
        })
    }
}

/// Digest comparison keeps the token check constant-time; raw token strings
/// are never compared directly.
fn digest(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({"detail": "invalid internal token"});
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

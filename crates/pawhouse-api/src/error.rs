//! HTTP error mapping.
//!
//! Handlers never leak internal error types; every failure maps onto one of
//! the fixed response kinds below.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug)]
pub enum ApiError {
    /// Broker rejected or timed out; the caller should retry later.
    Unavailable,
    NotFound(&'static str),
    Validation(&'static str),
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &'static str {
        match self {
            ApiError::Unavailable => "broker unavailable",
            ApiError::NotFound(detail) => detail,
            ApiError::Validation(detail) => detail,
            ApiError::Internal => "internal error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({"detail": self.detail()});
        (self.status(), Json(body)).into_response()
    }
}

impl From<pawhouse_broker::Error> for ApiError {
    fn from(err: pawhouse_broker::Error) -> Self {
        match err {
            pawhouse_broker::Error::Unavailable(_) | pawhouse_broker::Error::Transient(_) => {
                ApiError::Unavailable
            }
            pawhouse_broker::Error::Decode(_) | pawhouse_broker::Error::Serialization(_) => {
                ApiError::Internal
            }
        }
    }
}

//! Broker Error Types
//!
//! Every broker operation returns `Result<T>` aliased to `Result<T, Error>`.
//!
//! ## Error Categories
//! - `Unavailable`: connection refused, pool exhausted, ping failure. HTTP
//!   handlers map this to `503`; the worker loops with capped backoff.
//! - `Transient`: read/write timeout during normal operation. Messages stay
//!   pending and the reclaim path picks them up.
//! - `Decode`: a stream entry that cannot be decoded into a job; routed to
//!   the dead-letter stream.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker operation timed out: {0}")]
    Transient(String),

    #[error("decode error: {0}")]
    Decode(#[from] pawhouse_core::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure leaves messages pending for the reclaim path
    /// rather than signalling a dead broker.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Error::Transient(err.to_string())
        } else {
            Error::Unavailable(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(_) => Error::Transient(err.to_string()),
            _ => Error::Unavailable(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Transient("deadline exceeded".to_string())
    }
}

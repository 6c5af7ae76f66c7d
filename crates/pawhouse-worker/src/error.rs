//! Worker error types.
//!
//! Message-level failures never surface here - the loop logs and continues.
//! An `Error` out of `Worker::run` means the worker reached its `Failed`
//! state and the process should restart.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("broker error: {0}")]
    Broker(#[from] pawhouse_broker::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

//! Error types for core entity decoding.
//!
//! Decode failures surface as a single error kind so the worker can route
//! the offending message to the dead-letter stream with reason `"decode"`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

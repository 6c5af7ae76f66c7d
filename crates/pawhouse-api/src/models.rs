//! Request and response bodies for the internal endpoints.
//!
//! Cluster state responses reuse [`pawhouse_core::ClusterDescriptor`]
//! directly; its serialization is the cache wire format and the API
//! contract at once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pawhouse_core::JobPayload;

/// Body of `POST /internal/cluster-jobs`.
#[derive(Debug, Deserialize)]
pub struct ClusterJobRequest {
    pub pet_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub payload: JobPayload,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Fixed-shape status responses (`accepted`, `removed`, `noop`, `ok`).
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn accepted() -> Self {
        Self { status: "accepted" }
    }

    pub fn ok() -> Self {
        Self { status: "ok" }
    }

    pub fn removed(existed: bool) -> Self {
        Self {
            status: if existed { "removed" } else { "noop" },
        }
    }
}

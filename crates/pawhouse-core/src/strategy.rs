//! Cluster Strategy
//!
//! The strategy is the pluggable pure function at the heart of the worker:
//! `cluster(pet_id, payload, processed_at) -> ClusterDescriptor`.
//!
//! ## Determinism Contract
//! Given an identical payload, parameters and `processed_at`, the output is
//! byte-identical after serialization. The worker relies on this for
//! idempotent replays: a crash between the cache write and the ack causes a
//! redelivery that overwrites the cache with the exact same descriptor. The
//! clock is therefore an *input* (the worker passes the job's `emitted_at`),
//! never an ambient read.
//!
//! ## Default Binding
//! [`HeuristicStrategy`] groups images round-robin over the payload labels
//! and scores them with a blend of payload quality and a recency bias. An
//! embedding-backed strategy can swap in behind the same trait as long as it
//! honors the determinism contract.

use chrono::{DateTime, Utc};

use crate::descriptor::{Cluster, ClusterDescriptor, ClusterMetrics, Member};
use crate::job::{clamp01, JobPayload};

/// The pluggable pure transformation from job payload to cluster descriptor.
///
/// Implementations must not perform I/O and must not fail; malformed
/// payloads normalize to empty outputs.
pub trait ClusterStrategy: Send + Sync {
    /// Version tag stamped into descriptor metrics for future routing.
    fn version(&self) -> &str;

    fn cluster(
        &self,
        pet_id: &str,
        payload: &JobPayload,
        processed_at: DateTime<Utc>,
    ) -> ClusterDescriptor;
}

/// Tunables shared by strategy implementations.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// Upper bound on members per emitted cluster.
    pub max_cluster_size: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            max_cluster_size: 24,
        }
    }
}

/// Quality-weighted round-robin grouping over the payload labels.
#[derive(Debug, Clone, Default)]
pub struct HeuristicStrategy {
    params: StrategyParams,
}

const VERSION: &str = "heuristic-v1";

/// Weight of the payload-level quality score in member scoring.
const QUALITY_WEIGHT: f64 = 0.7;
/// Weight of the recency bias favoring earlier input positions.
const RECENCY_WEIGHT: f64 = 0.3;

impl HeuristicStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

impl ClusterStrategy for HeuristicStrategy {
    fn version(&self) -> &str {
        VERSION
    }

    fn cluster(
        &self,
        pet_id: &str,
        payload: &JobPayload,
        processed_at: DateTime<Utc>,
    ) -> ClusterDescriptor {
        let payload = payload.normalized();
        let total = payload.image_ids.len();

        let metrics = ClusterMetrics {
            coverage: payload.coverage.clone(),
            quality_score: payload.quality_score,
            processed_at,
            strategy_version: VERSION.to_string(),
        };

        if total == 0 {
            return ClusterDescriptor {
                pet_id: pet_id.to_string(),
                clusters: vec![],
                metrics,
                updated_at: processed_at,
            };
        }

        let groups: Vec<String> = if payload.labels.is_empty() {
            vec!["All".to_string()]
        } else {
            payload.labels.clone()
        };

        // Round-robin partition in input order: group k receives original
        // indices k, k + G, k + 2G, ...
        let mut assigned: Vec<Vec<(usize, &str)>> = vec![Vec::new(); groups.len()];
        for (index, image_id) in payload.image_ids.iter().enumerate() {
            assigned[index % groups.len()].push((index, image_id));
        }

        let clusters = groups
            .iter()
            .enumerate()
            .map(|(group_index, label)| {
                let mut scored: Vec<(usize, &str, f64)> = assigned[group_index]
                    .iter()
                    .map(|&(index, image_id)| {
                        let recency = 1.0 - index as f64 / total as f64;
                        let score = clamp01(
                            payload.quality_score * QUALITY_WEIGHT + recency * RECENCY_WEIGHT,
                        );
                        (index, image_id, score)
                    })
                    .collect();

                // Descending score, ties broken by ascending original index.
                scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
                scored.truncate(self.params.max_cluster_size);

                let members: Vec<Member> = scored
                    .iter()
                    .enumerate()
                    .map(|(position, &(_, image_id, score))| Member {
                        image_id: image_id.to_string(),
                        score,
                        position,
                    })
                    .collect();

                Cluster {
                    id: format!("{pet_id}-cluster-{group_index}"),
                    label: Some(label.clone()),
                    hero_image_id: members.first().map(|m| m.image_id.clone()),
                    members,
                }
            })
            .collect();

        ClusterDescriptor {
            pet_id: pet_id.to_string(),
            clusters,
            metrics,
            updated_at: processed_at,
        }
    }
}

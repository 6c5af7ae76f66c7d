//! Cluster Descriptor
//!
//! The cached per-pet artifact produced by one successful job. The
//! descriptor is serialized to JSON and stored under
//! `{namespace}:pets:{pet_id}:cluster`; its serialization must be
//! byte-identical for identical strategy inputs so that replays overwrite
//! the cache with the exact same value (`coverage` is a `BTreeMap` for
//! stable key order).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single image within a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub image_id: String,
    /// Ranking score in [0, 1]; monotone non-increasing along `position`.
    pub score: f64,
    /// Dense index into the cluster's member array.
    pub position: usize,
}

/// A group of similar images with a chosen hero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Derived id: `{pet_id}-cluster-{index}`.
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// The highest-scoring member; `None` only when the cluster is empty.
    #[serde(default)]
    pub hero_image_id: Option<String>,
    pub members: Vec<Member>,
}

/// Aggregate metrics stamped onto every descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    #[serde(default)]
    pub coverage: BTreeMap<String, f64>,
    pub quality_score: f64,
    pub processed_at: DateTime<Utc>,
    pub strategy_version: String,
}

/// The cached cluster state for one pet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub pet_id: String,
    pub clusters: Vec<Cluster>,
    pub metrics: ClusterMetrics,
    pub updated_at: DateTime<Utc>,
}

impl ClusterDescriptor {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Map of cluster id to hero image id, skipping empty clusters.
    pub fn hero_images(&self) -> BTreeMap<String, String> {
        self.clusters
            .iter()
            .filter_map(|c| {
                c.hero_image_id
                    .as_ref()
                    .map(|hero| (c.id.clone(), hero.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_descriptor() -> ClusterDescriptor {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        ClusterDescriptor {
            pet_id: "p1".to_string(),
            clusters: vec![Cluster {
                id: "p1-cluster-0".to_string(),
                label: Some("Portraits".to_string()),
                hero_image_id: Some("a".to_string()),
                members: vec![
                    Member {
                        image_id: "a".to_string(),
                        score: 0.9,
                        position: 0,
                    },
                    Member {
                        image_id: "b".to_string(),
                        score: 0.7,
                        position: 1,
                    },
                ],
            }],
            metrics: ClusterMetrics {
                coverage: BTreeMap::from([("portrait".to_string(), 0.6)]),
                quality_score: 0.9,
                processed_at: ts,
                strategy_version: "heuristic-v1".to_string(),
            },
            updated_at: ts,
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let descriptor = sample_descriptor();
        let json = descriptor.to_json().unwrap();
        let decoded = ClusterDescriptor::from_json(&json).unwrap();
        assert_eq!(descriptor, decoded);
    }

    #[test]
    fn test_serialization_is_stable() {
        let descriptor = sample_descriptor();
        assert_eq!(descriptor.to_json().unwrap(), descriptor.to_json().unwrap());
    }

    #[test]
    fn test_hero_images_skips_empty_clusters() {
        let mut descriptor = sample_descriptor();
        descriptor.clusters.push(Cluster {
            id: "p1-cluster-1".to_string(),
            label: None,
            hero_image_id: None,
            members: vec![],
        });
        let heroes = descriptor.hero_images();
        assert_eq!(heroes.len(), 1);
        assert_eq!(heroes["p1-cluster-0"], "a");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ClusterDescriptor::from_json("{oops").is_err());
    }

    #[test]
    fn test_timestamps_serialize_rfc3339() {
        let json = sample_descriptor().to_json().unwrap();
        assert!(json.contains("2024-05-01T12:00:00Z"));
    }
}

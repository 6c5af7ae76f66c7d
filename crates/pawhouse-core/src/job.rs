//! Job Envelope
//!
//! This module defines the `Job` type - the unit of work published on the
//! cluster stream.
//!
//! ## Structure
//! Each job names one pet and carries:
//! - **job_id**: Opaque token, unique per enqueue (assigned by the producer
//!   or by the enqueue endpoint)
//! - **pet_id**: The pet whose cluster state should be recomputed (required)
//! - **reason**: Free-form tag describing why the job was emitted
//! - **force**: Advisory flag; bypasses "no change" short-circuits
//! - **payload**: Image ids, labels, coverage weights and a quality score
//! - **metadata**: Free-form key/value pairs (trace context, producer id)
//! - **attempts**: Delivery attempt counter, 0 on first append
//! - **emitted_at**: Producer timestamp (RFC 3339 UTC)
//!
//! ## Wire Format
//! Stream entries are flat string-to-string maps. Scalar fields are plain
//! strings; `payload` and `metadata` are JSON strings in their own fields.
//! `Job::to_fields` and `Job::from_fields` round-trip this encoding.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A unit of work naming a pet and its source images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub pet_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub payload: JobPayload,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub attempts: u32,
    pub emitted_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job with `attempts = 0` and `emitted_at = now`.
    ///
    /// A `job_id` is generated when the producer did not supply one.
    pub fn new(
        pet_id: impl Into<String>,
        job_id: Option<String>,
        reason: Option<String>,
        force: bool,
        payload: JobPayload,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            job_id: job_id.unwrap_or_else(|| uuid::Uuid::new_v4().as_simple().to_string()),
            pet_id: pet_id.into(),
            reason,
            force,
            payload,
            metadata,
            attempts: 0,
            emitted_at: Utc::now(),
        }
    }

    /// Copy of this job with a bumped attempts counter, used by the
    /// re-append retry path.
    pub fn with_attempts(&self, attempts: u32) -> Self {
        let mut job = self.clone();
        job.attempts = attempts;
        job
    }

    /// Encode the job as the flat field map appended to the stream.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("job_id".to_string(), self.job_id.clone()),
            ("pet_id".to_string(), self.pet_id.clone()),
            ("force".to_string(), self.force.to_string()),
            ("attempts".to_string(), self.attempts.to_string()),
            ("emitted_at".to_string(), self.emitted_at.to_rfc3339()),
            ("payload".to_string(), serde_json::to_string(&self.payload)?),
            (
                "metadata".to_string(),
                serde_json::to_string(&self.metadata)?,
            ),
        ];
        if let Some(reason) = &self.reason {
            fields.push(("reason".to_string(), reason.clone()));
        }
        Ok(fields)
    }

    /// Decode a job from a stream entry's field map.
    ///
    /// Any missing required field or malformed value is a decode error;
    /// the worker dead-letters such messages with reason `"decode"`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let job_id = required(fields, "job_id")?;
        let pet_id = required(fields, "pet_id")?;

        let force = match fields.get("force").map(String::as_str) {
            None | Some("") => false,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(Error::InvalidField {
                    field: "force",
                    reason: format!("not a boolean: {other:?}"),
                })
            }
        };

        let attempts = match fields.get("attempts") {
            None => 0,
            Some(raw) => raw.parse::<u32>().map_err(|e| Error::InvalidField {
                field: "attempts",
                reason: e.to_string(),
            })?,
        };

        let emitted_at = fields
            .get("emitted_at")
            .ok_or(Error::MissingField("emitted_at"))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw).map_err(|e| Error::InvalidField {
                    field: "emitted_at",
                    reason: e.to_string(),
                })
            })?
            .with_timezone(&Utc);

        let payload = match fields.get("payload") {
            None => JobPayload::default(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        let metadata = match fields.get("metadata") {
            None => BTreeMap::new(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        Ok(Self {
            job_id,
            pet_id,
            reason: fields.get("reason").cloned(),
            force,
            payload,
            metadata,
            attempts,
            emitted_at,
        })
    }
}

fn required(fields: &HashMap<String, String>, name: &'static str) -> Result<String> {
    match fields.get(name) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(Error::MissingField(name)),
    }
}

/// The image set a job asks the strategy to group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub coverage: BTreeMap<String, f64>,
    #[serde(default)]
    pub quality_score: f64,
}

impl JobPayload {
    /// Normalize the payload into the form the strategy consumes.
    ///
    /// Image ids keep their first occurrence only, labels are deduplicated
    /// preserving order, coverage weights and the quality score are clamped
    /// into [0, 1]. Normalization is total: nothing here can fail.
    pub fn normalized(&self) -> JobPayload {
        let mut image_ids = Vec::with_capacity(self.image_ids.len());
        for id in &self.image_ids {
            if !id.is_empty() && !image_ids.contains(id) {
                image_ids.push(id.clone());
            }
        }

        let mut labels = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            if !label.is_empty() && !labels.contains(label) {
                labels.push(label.clone());
            }
        }

        let coverage = self
            .coverage
            .iter()
            .map(|(label, weight)| (label.clone(), clamp01(*weight)))
            .collect();

        JobPayload {
            image_ids,
            labels,
            coverage,
            quality_score: clamp01(self.quality_score),
        }
    }
}

/// Clamp a weight into [0, 1]; NaN collapses to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

//! Core types for the Pawhouse media-clustering service.
//!
//! This crate defines the three entities the rest of the workspace is built
//! around:
//! - the [`Job`] envelope carried on the cluster stream,
//! - the cached [`ClusterDescriptor`] produced by one successful job,
//! - the pluggable [`ClusterStrategy`] that turns a job payload into a
//!   descriptor.
//!
//! Everything here is pure data and pure computation; broker and HTTP
//! concerns live in the sibling crates.

pub mod descriptor;
pub mod error;
pub mod job;
pub mod strategy;

pub use descriptor::{Cluster, ClusterDescriptor, ClusterMetrics, Member};
pub use error::{Error, Result};
pub use job::{Job, JobPayload};
pub use strategy::{ClusterStrategy, HeuristicStrategy, StrategyParams};

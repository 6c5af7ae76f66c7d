//! Worker loop for the Pawhouse cluster stream.
//!
//! A [`Worker`] is a long-lived consumer inside the shared group: it reads
//! batches of never-delivered messages, dispatches them to the cluster
//! strategy, writes the cache, acknowledges, and periodically reclaims
//! messages left idle by dead consumers. Retry accounting and dead-letter
//! routing live here.
//!
//! [`WorkerPool`] runs N workers with unique consumer names and drains them
//! within a bounded grace period on shutdown.

pub mod config;
pub mod error;
pub mod pool;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use pool::WorkerPool;
pub use worker::{Worker, WorkerState};

//! Redis broker layer for Pawhouse.
//!
//! Two thin clients over one shared connection pool:
//! - [`RedisJobStream`]: consumer-group stream operations (append, blocking
//!   group read, idle-claim, ack, dead-letter),
//! - [`RedisStateCache`]: the per-pet cluster-state cache with TTL.
//!
//! Both are exposed behind object-safe traits ([`JobStream`],
//! [`StateCache`]) so the worker and the HTTP handlers can be exercised
//! against in-memory fakes.

pub mod cache;
pub mod config;
pub mod error;
pub mod pool;
pub mod stream;

pub use cache::{RedisStateCache, StateCache};
pub use config::{RedisConfig, StreamConfig};
pub use error::{Error, Result};
pub use pool::{build_pool, BrokerPool};
pub use stream::{JobStream, RedisJobStream, StreamMessage};

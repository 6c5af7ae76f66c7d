//! Configuration and lifecycle wiring for the Pawhouse server binary.

pub mod config;

pub use config::{ConfigError, Settings};

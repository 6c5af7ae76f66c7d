//! Typed configuration from environment variables.
//!
//! Loaded once at startup; every malformed value fails fast with the
//! variable name in the message. The placeholder internal token is refused
//! outside `local` and `development` environments.
//!
//! ## Recognized Variables
//!
//! ### Broker wiring
//! - `REDIS_URL`, `REDIS_USERNAME`, `REDIS_PASSWORD`, `REDIS_SSL`,
//!   `REDIS_SSL_CA_CERTS`, `REDIS_POOL_MAX_CONNECTIONS`,
//!   `REDIS_SOCKET_TIMEOUT`, `REDIS_SOCKET_CONNECT_TIMEOUT`,
//!   `REDIS_HEALTHCHECK_INTERVAL`, `REDIS_RETRY_ON_TIMEOUT`
//!
//! ### HTTP surface
//! - `INTERNAL_TOKEN`, `HTTP_HOST`, `HTTP_PORT`,
//!   `HTTP_REQUEST_TIMEOUT_SECS`, `SHUTDOWN_TIMEOUT_SECS`
//!
//! ### Cache & strategy
//! - `NAMESPACE`, `CLUSTER_TTL_SECONDS`, `MAX_CLUSTER_SIZE`
//!
//! ### Stream & worker
//! - `CLUSTER_STREAM_KEY`, `CLUSTER_DEAD_LETTER_STREAM`,
//!   `CLUSTER_STREAM_MAXLEN`, `CLUSTER_STREAM_APPROXIMATE_TRIM`,
//!   `CLUSTER_CONSUMER_GROUP`, `CLUSTER_WORKER_CONSUMER_NAME`,
//!   `CLUSTER_WORKER_REPLICAS`, `CLUSTER_READ_TIMEOUT_MS`,
//!   `CLUSTER_READ_COUNT`, `CLUSTER_RETRY_IDLE_MS`, `CLUSTER_MAX_ATTEMPTS`,
//!   `CLUSTER_MAX_PENDING`
//!
//! ### Metrics & diagnostics
//! - `WORKER_METRICS_ENABLED`, `WORKER_METRICS_HOST`, `WORKER_METRICS_PORT`,
//!   `ENVIRONMENT`, `APP_NAME`

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use pawhouse_broker::{RedisConfig, StreamConfig};
use pawhouse_core::StrategyParams;
use pawhouse_worker::WorkerConfig;

/// Placeholder token shipped in example configs; refused outside
/// development environments.
const PLACEHOLDER_TOKEN: &str = "changeme";

const ENVIRONMENTS: &[&str] = &["local", "development", "staging", "production"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(
        "INTERNAL_TOKEN is still the placeholder value; set a real token in {environment} environments"
    )]
    InsecureToken { environment: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: String,
    pub app_name: String,

    pub redis: RedisConfig,
    pub internal_token: String,
    pub namespace: String,

    pub cluster_ttl: Duration,
    pub max_cluster_size: usize,

    pub stream: StreamConfig,
    pub worker_consumer_name: String,
    pub worker_replicas: usize,
    pub read_timeout: Duration,
    pub read_count: usize,
    pub retry_idle: Duration,
    pub max_attempts: u32,
    pub max_pending: usize,

    pub http_host: String,
    pub http_port: u16,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,

    pub metrics_enabled: bool,
    pub metrics_host: String,
    pub metrics_port: u16,
}

impl Settings {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary lookup (tests inject maps here
    /// instead of mutating the process environment).
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = string(lookup, "ENVIRONMENT", "local");
        if !ENVIRONMENTS.contains(&environment.as_str()) {
            return Err(ConfigError::Invalid {
                name: "ENVIRONMENT",
                reason: format!("{environment:?} is not one of {ENVIRONMENTS:?}"),
            });
        }

        let redis = RedisConfig {
            url: string(lookup, "REDIS_URL", "redis://127.0.0.1:6379/0"),
            username: lookup("REDIS_USERNAME"),
            password: lookup("REDIS_PASSWORD"),
            ssl: bool_var(lookup, "REDIS_SSL", false)?,
            ssl_ca_certs: lookup("REDIS_SSL_CA_CERTS"),
            pool_max_connections: parse(lookup, "REDIS_POOL_MAX_CONNECTIONS", 20usize)?,
            socket_timeout: opt_secs_f64(lookup, "REDIS_SOCKET_TIMEOUT")?,
            socket_connect_timeout: secs_f64(lookup, "REDIS_SOCKET_CONNECT_TIMEOUT", 5.0)?,
            healthcheck_interval: Duration::from_secs(parse(
                lookup,
                "REDIS_HEALTHCHECK_INTERVAL",
                30u64,
            )?),
            retry_on_timeout: bool_var(lookup, "REDIS_RETRY_ON_TIMEOUT", true)?,
        };

        let settings = Self {
            environment,
            app_name: string(lookup, "APP_NAME", "pawhouse-media-clustering"),
            redis,
            internal_token: string(lookup, "INTERNAL_TOKEN", PLACEHOLDER_TOKEN),
            namespace: string(lookup, "NAMESPACE", "media.clusters"),
            cluster_ttl: Duration::from_secs(parse(lookup, "CLUSTER_TTL_SECONDS", 86_400u64)?),
            max_cluster_size: parse(lookup, "MAX_CLUSTER_SIZE", 24usize)?,
            stream: StreamConfig {
                stream_key: string(lookup, "CLUSTER_STREAM_KEY", "streams:media.cluster"),
                dead_letter_stream: string(
                    lookup,
                    "CLUSTER_DEAD_LETTER_STREAM",
                    "streams:media.cluster.deadletter",
                ),
                consumer_group: string(lookup, "CLUSTER_CONSUMER_GROUP", "media-clustering-workers"),
                maxlen: parse(lookup, "CLUSTER_STREAM_MAXLEN", 10_000usize)?,
                approximate_trim: bool_var(lookup, "CLUSTER_STREAM_APPROXIMATE_TRIM", true)?,
            },
            worker_consumer_name: string(
                lookup,
                "CLUSTER_WORKER_CONSUMER_NAME",
                "media-clustering-worker",
            ),
            worker_replicas: parse(lookup, "CLUSTER_WORKER_REPLICAS", 1usize)?,
            read_timeout: Duration::from_millis(parse(lookup, "CLUSTER_READ_TIMEOUT_MS", 5_000u64)?),
            read_count: parse(lookup, "CLUSTER_READ_COUNT", 16usize)?,
            retry_idle: Duration::from_millis(parse(lookup, "CLUSTER_RETRY_IDLE_MS", 60_000u64)?),
            max_attempts: parse(lookup, "CLUSTER_MAX_ATTEMPTS", 5u32)?,
            max_pending: parse(lookup, "CLUSTER_MAX_PENDING", 64usize)?,
            http_host: string(lookup, "HTTP_HOST", "0.0.0.0"),
            http_port: parse(lookup, "HTTP_PORT", 8000u16)?,
            request_timeout: Duration::from_secs(parse(
                lookup,
                "HTTP_REQUEST_TIMEOUT_SECS",
                30u64,
            )?),
            shutdown_grace: Duration::from_secs(parse(lookup, "SHUTDOWN_TIMEOUT_SECS", 30u64)?),
            metrics_enabled: bool_var(lookup, "WORKER_METRICS_ENABLED", true)?,
            metrics_host: string(lookup, "WORKER_METRICS_HOST", "0.0.0.0"),
            metrics_port: parse(lookup, "WORKER_METRICS_PORT", 9105u16)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let development = matches!(self.environment.as_str(), "local" | "development");
        if self.internal_token == PLACEHOLDER_TOKEN && !development {
            return Err(ConfigError::InsecureToken {
                environment: self.environment.clone(),
            });
        }

        if let Some(path) = &self.redis.ssl_ca_certs {
            if !std::path::Path::new(path).exists() {
                return Err(ConfigError::Invalid {
                    name: "REDIS_SSL_CA_CERTS",
                    reason: format!("file not found: {path}"),
                });
            }
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "CLUSTER_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.worker_replicas == 0 {
            return Err(ConfigError::Invalid {
                name: "CLUSTER_WORKER_REPLICAS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            max_cluster_size: self.max_cluster_size,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            consumer_name: self.worker_consumer_name.clone(),
            read_count: self.read_count,
            read_block: self.read_timeout,
            retry_idle: self.retry_idle,
            max_attempts: self.max_attempts,
            max_pending: self.max_pending,
            cache_ttl: self.cluster_ttl,
            ..WorkerConfig::default()
        }
    }
}

fn string(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.is_empty() => Ok(default),
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
    }
}

fn bool_var(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.is_empty() => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("not a boolean: {other:?}"),
            }),
        },
    }
}

fn secs_f64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    default: f64,
) -> Result<Duration, ConfigError> {
    let seconds: f64 = parse(lookup, name, default)?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be a non-negative number of seconds, got {seconds}"),
        });
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn opt_secs_f64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => {
            let seconds: f64 = raw.parse().map_err(|err: std::num::ParseFloatError| {
                ConfigError::Invalid {
                    name,
                    reason: err.to_string(),
                }
            })?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("must be a non-negative number of seconds, got {seconds}"),
                });
            }
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
    }
}

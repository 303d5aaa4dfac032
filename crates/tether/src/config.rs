//! Process-wide configuration, built once at startup from the environment.

use std::env;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

/// Configuration errors are fatal at startup; nothing retries them.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(
        "TETHER_HEARTBEAT_INTERVAL_SECONDS ({interval}s) must be less than half of \
         TETHER_LEASE_TTL_SECONDS ({ttl}s)"
    )]
    HeartbeatTooSlow { interval: u64, ttl: u64 },
}

/// Immutable application configuration.
///
/// Loaded from `TETHER_*` environment variables (with `.env` support in
/// development). Not reread after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string for the run store.
    pub database_url: String,
    /// Connection string for the hint queue; defaults to `database_url`.
    pub queue_url: String,
    /// HTTP bind address for the admission server.
    pub bind_addr: String,
    /// Default tracing filter level (debug, info, warn, error).
    pub log_level: String,
    /// Lease duration granted per acquisition/renewal.
    pub lease_ttl_seconds: u64,
    /// Heartbeat cadence; must be strictly less than half the lease TTL.
    pub heartbeat_interval_seconds: u64,
    /// Hard outer bound on a single model run.
    pub job_timeout_seconds: u64,
    /// Cadence of the worker's dispatch scan.
    pub poll_interval_seconds: u64,
    /// Maximum concurrently executing runs per worker process.
    pub worker_concurrency: usize,
    /// Acquisitions after which a claimable run fails as exhausted.
    pub max_attempts: i32,
    /// Directory for the filesystem result sink.
    pub result_dir: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env if present (development)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("TETHER_DATABASE_URL")
            .ok_or(ConfigError::Missing {
                name: "TETHER_DATABASE_URL",
            })?;
        let queue_url = lookup("TETHER_QUEUE_URL").unwrap_or_else(|| database_url.clone());

        let config = Self {
            queue_url,
            bind_addr: lookup("TETHER_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_level: lookup("TETHER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            lease_ttl_seconds: parse_or(&lookup, "TETHER_LEASE_TTL_SECONDS", 60)?,
            heartbeat_interval_seconds: parse_or(&lookup, "TETHER_HEARTBEAT_INTERVAL_SECONDS", 20)?,
            job_timeout_seconds: parse_or(&lookup, "TETHER_JOB_TIMEOUT_SECONDS", 3600)?,
            poll_interval_seconds: parse_or(&lookup, "TETHER_POLL_INTERVAL_SECONDS", 5)?,
            worker_concurrency: parse_or(&lookup, "TETHER_WORKER_CONCURRENCY", 4usize)?,
            max_attempts: parse_or(&lookup, "TETHER_MAX_ATTEMPTS", 5i32)?,
            result_dir: lookup("TETHER_RESULT_DIR").unwrap_or_else(|| "./run-results".to_string()),
            database_url,
        };

        if config.heartbeat_interval_seconds * 2 >= config.lease_ttl_seconds {
            return Err(ConfigError::HeartbeatTooSlow {
                interval: config.heartbeat_interval_seconds,
                ttl: config.lease_ttl_seconds,
            });
        }

        Ok(config)
    }

    pub fn lease_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.lease_ttl_seconds as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

fn parse_or<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

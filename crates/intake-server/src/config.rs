//! Service configuration.

use std::net::SocketAddr;
use std::path::Path;

use intake_core::{IntakeError, Result};
use serde::{Deserialize, Serialize};

/// Service configuration, loaded from TOML with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Admin surface bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Storage pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded work-queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Scheduler scan interval in milliseconds
    #[serde(default = "default_scheduler_interval_ms")]
    pub scheduler_interval_ms: u64,

    /// Per-source duplicate LRU capacity
    #[serde(default = "default_duplicate_cache")]
    pub duplicate_cache_size: usize,

    /// Tracing filter, e.g. `info,intake_engine=debug`
    #[serde(default = "default_tracing_filter")]
    pub tracing_filter: String,
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("static bind address")
}

fn default_database_url() -> String {
    "postgresql://localhost/intake".to_string()
}

const fn default_pool_size() -> usize {
    10
}

const fn default_workers() -> usize {
    8
}

const fn default_queue_capacity() -> usize {
    64
}

const fn default_scheduler_interval_ms() -> u64 {
    200
}

const fn default_duplicate_cache() -> usize {
    4_096
}

fn default_tracing_filter() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr:             default_bind_addr(),
            database_url:          default_database_url(),
            pool_size:             default_pool_size(),
            workers:               default_workers(),
            queue_capacity:        default_queue_capacity(),
            scheduler_interval_ms: default_scheduler_interval_ms(),
            duplicate_cache_size:  default_duplicate_cache(),
            tracing_filter:        default_tracing_filter(),
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file, falling back to defaults when the file does
    /// not exist, then apply environment overrides (`INTAKE_DATABASE_URL`,
    /// `INTAKE_BIND_ADDR`).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on unreadable or malformed TOML, or a malformed
    /// bind-address override.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| IntakeError::InvalidConfig {
                message: format!("cannot read {}: {e}", path.display()),
            })?;
            toml::from_str(&raw).map_err(|e| IntakeError::InvalidConfig {
                message: format!("cannot parse {}: {e}", path.display()),
            })?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("INTAKE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(addr) = std::env::var("INTAKE_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| IntakeError::InvalidConfig {
                message: format!("INTAKE_BIND_ADDR: {e}"),
            })?;
        }
        Ok(config)
    }

    /// The engine tuning this service configuration implies.
    #[must_use]
    pub fn engine_config(&self) -> intake_engine::EngineConfig {
        intake_engine::EngineConfig {
            workers:               self.workers,
            queue_capacity:        self.queue_capacity,
            scheduler_interval_ms: self.scheduler_interval_ms,
            duplicate_cache_size:  self.duplicate_cache_size,
            ..intake_engine::EngineConfig::default()
        }
    }
}

//! Configuration for the lectern components.
//!
//! All settings have working defaults and can be overridden from the
//! environment with a `LECTERN_` prefix.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn get_env(key: &str) -> Option<String> {
    std::env::var(format!("LECTERN_{key}")).ok()
}

/// Aggregate configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LecternConfig {
    pub logging: LoggingConfig,
    pub reconcile: ReconcileConfig,
    pub status: StatusConfig,
    pub sweep: SweepConfig,
}

impl LecternConfig {
    /// Load every section from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            logging: LoggingConfig::from_env(),
            reconcile: ReconcileConfig::from_env(),
            status: StatusConfig::from_env(),
            sweep: SweepConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_log_json(),
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = get_env("LOG_LEVEL") {
            config.level = level;
        }
        if let Some(json) = get_env("LOG_JSON") {
            config.json = json.parse().unwrap_or(false);
        }
        config
    }
}

/// Settings for the reconciler.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// How many times a reconcile retries after losing a version race
    /// before surfacing a storage error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(attempts) = get_env("RECONCILE_MAX_ATTEMPTS") {
            if let Ok(a) = attempts.parse::<u32>() {
                config.max_attempts = a.max(1);
            }
        }
        config
    }
}

/// Settings for the status read path.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct StatusConfig {
    /// How long a cached status stays valid.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached users.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl StatusConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ttl) = get_env("STATUS_CACHE_TTL_SECONDS") {
            if let Ok(t) = ttl.parse() {
                config.cache_ttl_seconds = t;
            }
        }
        if let Some(capacity) = get_env("STATUS_CACHE_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                config.cache_capacity = c;
            }
        }
        config
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Settings for the periodic expiry sweep.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SweepConfig {
    /// Seconds between sweep passes.
    #[serde(default = "default_sweep_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl SweepConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(interval) = get_env("SWEEP_INTERVAL_SECONDS") {
            if let Ok(i) = interval.parse() {
                config.interval_seconds = i;
            }
        }
        config
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    false
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

//! Configuration management for the quota governor.
//!
//! [`RateLimitConfig`] is the validated, immutable form consumed by the
//! limiter. [`RateLimitSettings`] is the raw, deserializable form read from
//! YAML, option maps or the environment. Converting one into the other is the
//! only place settings are validated.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

/// Environment variable prefix used by [`RateLimitConfig::load`].
pub const ENV_PREFIX: &str = "QUOTA";

/// Validated rate limiting settings.
///
/// Construct through [`RateLimitConfig::builder`] or one of the loaders; an
/// invalid combination never produces an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    minute_limit: u64,
    daily_limit: u64,
    retry_delay: Duration,
    cleanup_interval: Duration,
    max_array_size: usize,
}

impl RateLimitConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Maximum admitted requests per minute window.
    pub fn minute_limit(&self) -> u64 {
        self.minute_limit
    }

    /// Maximum admitted requests per day window.
    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    /// Fallback wait when no window state is available.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Minimum time between cleanup passes.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Maximum number of tracked buckets.
    pub fn max_array_size(&self) -> usize {
        self.max_array_size
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: RateLimitSettings = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse rate limit config: {}", e)))?;
        settings.validate()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a JSON options map.
    ///
    /// Unrecognized keys are ignored and missing keys take their defaults.
    pub fn from_options(options: &serde_json::Value) -> Result<Self, ConfigError> {
        let settings: RateLimitSettings = serde_json::from_value(options.clone())
            .map_err(|e| ConfigError::Parse(format!("Invalid rate limit options: {}", e)))?;
        settings.validate()
    }

    /// Load configuration from an optional file layered under `QUOTA_*`
    /// environment variables (e.g. `QUOTA_MINUTE_LIMIT=50`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading rate limit configuration");
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings: RateLimitSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            minute_limit: default_minute_limit() as u64,
            daily_limit: default_daily_limit() as u64,
            retry_delay: Duration::from_secs(default_retry_delay() as u64),
            cleanup_interval: Duration::from_secs(default_cleanup_interval() as u64),
            max_array_size: default_max_array_size() as usize,
        }
    }
}

/// Raw, unvalidated settings as they appear in files and option maps.
///
/// Fields are signed so that negative input reaches validation and is
/// reported with a descriptive error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per minute
    #[serde(default = "default_minute_limit")]
    pub minute_limit: i64,

    /// Requests allowed per day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i64,

    /// Fallback retry delay in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: i64,

    /// Cleanup interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: i64,

    /// Maximum number of tracked buckets
    #[serde(default = "default_max_array_size")]
    pub max_array_size: i64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            minute_limit: default_minute_limit(),
            daily_limit: default_daily_limit(),
            retry_delay: default_retry_delay(),
            cleanup_interval: default_cleanup_interval(),
            max_array_size: default_max_array_size(),
        }
    }
}

impl RateLimitSettings {
    /// Validate the settings and produce an immutable configuration.
    pub fn validate(self) -> Result<RateLimitConfig, ConfigError> {
        let minute_limit = positive("minute_limit", self.minute_limit)?;
        let daily_limit = positive("daily_limit", self.daily_limit)?;
        if self.daily_limit < self.minute_limit {
            return Err(ConfigError::DailyBelowMinute {
                daily: self.daily_limit,
                minute: self.minute_limit,
            });
        }
        if self.retry_delay < 0 {
            return Err(ConfigError::NegativeRetryDelay(self.retry_delay));
        }
        let cleanup_interval = positive("cleanup_interval", self.cleanup_interval)?;
        let max_array_size = positive("max_array_size", self.max_array_size)?;
        let max_array_size = usize::try_from(max_array_size).map_err(|_| {
            ConfigError::Parse(format!("max_array_size {} does not fit in memory", max_array_size))
        })?;

        Ok(RateLimitConfig {
            minute_limit,
            daily_limit,
            retry_delay: Duration::from_secs(self.retry_delay as u64),
            cleanup_interval: Duration::from_secs(cleanup_interval),
            max_array_size,
        })
    }
}

fn positive(field: &'static str, value: i64) -> Result<u64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidLimit { field, value });
    }
    Ok(value as u64)
}

fn default_minute_limit() -> i64 {
    100
}

fn default_daily_limit() -> i64 {
    1000
}

fn default_retry_delay() -> i64 {
    60
}

fn default_cleanup_interval() -> i64 {
    300
}

fn default_max_array_size() -> i64 {
    10000
}

/// Fluent builder for [`RateLimitConfig`].
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfigBuilder {
    settings: RateLimitSettings,
}

impl RateLimitConfigBuilder {
    /// Set the per-minute quota.
    pub fn minute_limit(mut self, limit: i64) -> Self {
        self.settings.minute_limit = limit;
        self
    }

    /// Set the per-day quota.
    pub fn daily_limit(mut self, limit: i64) -> Self {
        self.settings.daily_limit = limit;
        self
    }

    /// Set the fallback retry delay in seconds.
    pub fn retry_delay(mut self, secs: i64) -> Self {
        self.settings.retry_delay = secs;
        self
    }

    /// Set the cleanup interval in seconds.
    pub fn cleanup_interval(mut self, secs: i64) -> Self {
        self.settings.cleanup_interval = secs;
        self
    }

    /// Set the maximum number of tracked buckets.
    pub fn max_array_size(mut self, size: i64) -> Self {
        self.settings.max_array_size = size;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        self.settings.validate()
    }
}

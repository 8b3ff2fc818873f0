//! Runtime configuration
//!
//! Configured externally (file, env) and immutable after startup. Every
//! section has defaults, so an empty JSON object is a valid configuration.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::log::MAX_RECORD_SIZE;
use crate::store::PAGE_SIZE;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageLogConfig {
    /// Largest logical message value accepted by `append`.
    ///
    /// Values above 65 535 bytes are split into continuation records.
    pub max_message_size: usize,
    /// Address published in the leader-info record while leading.
    pub advertised_address: String,
    pub reader: ReaderConfig,
    pub lease: LeaseConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

impl Default for PageLogConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            advertised_address: "127.0.0.1:8080".to_string(),
            reader: ReaderConfig::default(),
            lease: LeaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PageLogConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size",
                "must be greater than zero".to_string(),
            ));
        }
        if self.advertised_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "advertised_address",
                "must not be empty".to_string(),
            ));
        }
        self.reader.validate()?;
        self.lease.validate()?;
        self.scheduler.validate()?;
        self.store.validate()
    }
}

/// Read-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Size of the local download window of a paged read stream.
    pub window_capacity: usize,
    /// Minimum download per window refill. A refill fetches what the pending
    /// request lacks, topped up to this many bytes when the window allows.
    pub read_ahead: usize,
    /// Delay between checkpoint re-checks while tail polling.
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            window_capacity: 1024 * 1024,
            read_ahead: 64 * 1024,
            poll_interval_ms: 250,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.window_capacity < MAX_RECORD_SIZE {
            return Err(ConfigError::Invalid(
                "reader.window_capacity",
                format!("must be at least {} bytes", MAX_RECORD_SIZE),
            ));
        }
        if self.read_ahead == 0 || self.read_ahead > self.window_capacity {
            return Err(ConfigError::Invalid(
                "reader.read_ahead",
                "must be between 1 and reader.window_capacity".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reader.poll_interval_ms",
                "must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Leader election settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// How long one acquisition or renewal keeps the lease.
    pub lease_duration_ms: u64,
    /// Renewal cadence; must be shorter than the lease duration.
    pub renew_interval_ms: u64,
    /// Delay between acquisition attempts while another node leads.
    pub acquire_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: 60_000,
            renew_interval_ms: 20_000,
            acquire_interval_ms: 5_000,
        }
    }
}

impl LeaseConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.renew_interval_ms == 0 || self.renew_interval_ms >= self.lease_duration_ms {
            return Err(ConfigError::Invalid(
                "lease.renew_interval_ms",
                format!(
                    "must be in 1..{} (shorter than the lease duration)",
                    self.lease_duration_ms
                ),
            ));
        }
        if self.acquire_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "lease.acquire_interval_ms",
                "must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Write scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of lanes; `None` uses the available parallelism.
    pub lanes: Option<usize>,
    /// Upper bound on draining queued appends when leadership ends.
    pub drain_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lanes: None,
            drain_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    /// Resolved lane count, never below one.
    pub fn lane_count(&self) -> usize {
        self.lanes
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.lanes == Some(0) {
            return Err(ConfigError::Invalid(
                "scheduler.lanes",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store adapter settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Largest single page write accepted by the local adapters.
    pub max_commit_size: usize,
    /// Growth step of a page region, in bytes.
    pub grow_increment: u64,
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_commit_size: 4 * 1024 * 1024,
            grow_increment: 32 * 1024 * 1024,
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_commit_size % PAGE_SIZE != 0 {
            return Err(ConfigError::Invalid(
                "store.max_commit_size",
                format!("must be a multiple of the page size ({})", PAGE_SIZE),
            ));
        }
        if self.max_commit_size < MAX_RECORD_SIZE + PAGE_SIZE {
            return Err(ConfigError::Invalid(
                "store.max_commit_size",
                format!("must be at least {} bytes", MAX_RECORD_SIZE + PAGE_SIZE),
            ));
        }
        if self.grow_increment == 0 || self.grow_increment % PAGE_SIZE as u64 != 0 {
            return Err(ConfigError::Invalid(
                "store.grow_increment",
                "must be a positive multiple of the page size".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Bounded exponential backoff for transient store faults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "store.retry.backoff_multiplier",
                "must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

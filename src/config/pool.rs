//! Pool and scheduler configuration structures.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, SchedulerError};

/// Default batch construction window.
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 300;
/// Default capacity of the pending-operation queue.
pub const DEFAULT_MAX_PENDING_OPERATIONS: usize = 1024;
/// Default number of events kept by the in-memory telemetry sink.
pub const DEFAULT_EVENT_BUFFER_LIMIT: usize = 10_000;

const ENV_BATCH_WINDOW_MS: &str = "QSCHEDULER_BATCH_WINDOW_MS";
const ENV_MAX_PENDING_OPERATIONS: &str = "QSCHEDULER_MAX_PENDING_OPERATIONS";
const ENV_EVENT_BUFFER_LIMIT: &str = "QSCHEDULER_EVENT_BUFFER_LIMIT";
const ENV_SORT_UPDATES_BY_TIME: &str = "QSCHEDULER_SORT_UPDATES_BY_TIME";

const fn default_batch_window_ms() -> u64 {
    DEFAULT_BATCH_WINDOW_MS
}

const fn default_max_pending_operations() -> usize {
    DEFAULT_MAX_PENDING_OPERATIONS
}

const fn default_event_buffer_limit() -> usize {
    DEFAULT_EVENT_BUFFER_LIMIT
}

const fn default_true() -> bool {
    true
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// How long a batch stays open for more operations, in milliseconds.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Pending operations admitted before enqueuers have to wait.
    #[serde(default = "default_max_pending_operations")]
    pub max_pending_operations: usize,
    /// Events retained by the in-memory telemetry sink.
    #[serde(default = "default_event_buffer_limit")]
    pub event_buffer_limit: usize,
    /// Apply task updates in event-time order rather than delivery order.
    #[serde(default = "default_true")]
    pub sort_updates_by_time: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: DEFAULT_BATCH_WINDOW_MS,
            max_pending_operations: DEFAULT_MAX_PENDING_OPERATIONS,
            event_buffer_limit: DEFAULT_EVENT_BUFFER_LIMIT,
            sort_updates_by_time: true,
        }
    }
}

impl PoolConfig {
    /// Construction window as a [`Duration`].
    #[must_use]
    pub const fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.batch_window_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "batch_window_ms must be greater than 0".into(),
            ));
        }
        if self.max_pending_operations == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_pending_operations must be greater than 0".into(),
            ));
        }
        if self.event_buffer_limit == 0 {
            return Err(SchedulerError::InvalidConfig(
                "event_buffer_limit must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Build a pool configuration from `QSCHEDULER_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// A variable that does not parse, or a resulting invalid configuration.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let cfg = Self {
            batch_window_ms: env_or(ENV_BATCH_WINDOW_MS, DEFAULT_BATCH_WINDOW_MS)?,
            max_pending_operations: env_or(
                ENV_MAX_PENDING_OPERATIONS,
                DEFAULT_MAX_PENDING_OPERATIONS,
            )?,
            event_buffer_limit: env_or(ENV_EVENT_BUFFER_LIMIT, DEFAULT_EVENT_BUFFER_LIMIT)?,
            sort_updates_by_time: env_or(ENV_SORT_UPDATES_BY_TIME, true)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_or<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value `{raw}`")),
        Err(_) => Ok(default),
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` for an empty pool map or an invalid pool.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pools.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "at least one pool must be defined".into(),
            ));
        }
        for (name, pool) in &self.pools {
            if name.is_empty() {
                return Err(SchedulerError::InvalidConfig("pool name must not be empty".into()));
            }
            pool.validate().map_err(|e| match e {
                SchedulerError::InvalidConfig(msg) => {
                    SchedulerError::InvalidConfig(format!("pool `{name}` invalid: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// I/O, parse or validation failure, with the file path as context.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("loading config file {}", path.display()))
    }
}

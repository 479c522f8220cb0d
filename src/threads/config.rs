//! Scheduler configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding [`SchedulerConfig::workers`].
pub const WORKERS_ENV: &str = "STENCIL_WORKERS";
/// Environment variable overriding [`SchedulerConfig::park_timeout_us`].
pub const PARK_TIMEOUT_ENV: &str = "STENCIL_PARK_TIMEOUT_US";

/// Scheduler configuration.
///
/// | Knob              | Effect                                                        |
/// |-------------------|---------------------------------------------------------------|
/// | `workers`         | Number of OS threads tasks are multiplexed over               |
/// | `park_timeout_us` | Upper bound on how long an idle worker sleeps between checks  |
/// | `stack_size`      | Worker stack size; `None` keeps the platform default          |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Name given to worker threads (suffixed with the worker index).
    pub thread_name: String,
    /// Idle park timeout in microseconds.
    pub park_timeout_us: u64,
    /// Worker stack size in bytes.
    pub stack_size: Option<usize>,
}

impl SchedulerConfig {
    /// Checks every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".into()));
        }
        if self.park_timeout_us == 0 {
            return Err(ConfigError::Invalid("park_timeout_us must be > 0".into()));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `STENCIL_WORKERS` and `STENCIL_PARK_TIMEOUT_US` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = parse_env(WORKERS_ENV)? {
            config.workers = workers;
        }
        if let Some(timeout) = parse_env(PARK_TIMEOUT_ENV)? {
            config.park_timeout_us = timeout;
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Idle park timeout as a [`Duration`].
    #[inline]
    pub fn park_timeout(&self) -> Duration {
        Duration::from_micros(self.park_timeout_us)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(2);
        Self {
            workers,
            thread_name: "stencil-worker".to_owned(),
            park_timeout_us: 500,
            stack_size: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.workers >= 1 && config.workers <= 4);
    }

    #[test]
    fn json_overrides_only_given_fields() {
        let config = SchedulerConfig::from_json(r#"{ "workers": 3 }"#).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "stencil-worker");
        assert_eq!(config.park_timeout(), Duration::from_micros(500));
    }

    #[test]
    fn json_rejects_zero_workers() {
        let err = SchedulerConfig::from_json(r#"{ "workers": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let err = SchedulerConfig::from_json(r#"{ "threads": 2 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}

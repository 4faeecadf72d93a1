//! Engine configuration: retry policy, projection dispatch mode, storage, logging.
//!
//! Values come from `PROOFING_*` environment variables (plus `DATABASE_URL`);
//! anything unset falls back to [`EngineConfig::default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use proofing_observability::LogFormat;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Retry behavior for commands that lose an optimistic concurrency race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry immediately, `max_attempts` times in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sleep before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "PROOFING_RETRY_MAX_ATTEMPTS",
                "0",
                "at least one attempt is required",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "PROOFING_RETRY_BACKOFF_MULTIPLIER",
                self.backoff_multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "PROOFING_RETRY_BASE_DELAY_MS",
                self.base_delay.as_millis().to_string(),
                "must not exceed the maximum delay",
            ));
        }
        Ok(())
    }
}

/// When committed events reach the projectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionDispatchMode {
    /// The command handler dispatches after commit, before returning (read-your-writes).
    #[default]
    Synchronous,
    /// Committed events are published on a bus and applied by a background worker.
    Asynchronous,
}

impl core::str::FromStr for ProjectionDispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Self::Synchronous),
            "async" | "asynchronous" => Ok(Self::Asynchronous),
            _ => Err(ConfigError::invalid(
                "PROOFING_PROJECTION_DISPATCH",
                s,
                "expected 'sync' or 'async'",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub projection_dispatch: ProjectionDispatchMode,
    /// Postgres connection string; `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            projection_dispatch: ProjectionDispatchMode::default(),
            database_url: None,
            database_max_connections: 10,
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test fixtures).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("PROOFING_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse("PROOFING_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PROOFING_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(parse("PROOFING_RETRY_BASE_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("PROOFING_RETRY_MAX_DELAY_MS") {
            config.retry.max_delay = Duration::from_millis(parse("PROOFING_RETRY_MAX_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("PROOFING_RETRY_BACKOFF_MULTIPLIER") {
            config.retry.backoff_multiplier = parse("PROOFING_RETRY_BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("PROOFING_PROJECTION_DISPATCH") {
            config.projection_dispatch = v.parse()?;
        }
        if let Some(v) = lookup("PROOFING_LOG_FORMAT") {
            config.log_format = v
                .parse()
                .map_err(|e: proofing_observability::UnknownLogFormat| {
                    ConfigError::invalid("PROOFING_LOG_FORMAT", v.clone(), e.to_string())
                })?;
        }
        if let Some(v) = lookup("PROOFING_DB_MAX_CONNECTIONS") {
            config.database_max_connections = parse("PROOFING_DB_MAX_CONNECTIONS", &v)?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.database_max_connections == 0 {
            return Err(ConfigError::invalid(
                "PROOFING_DB_MAX_CONNECTIONS",
                "0",
                "the pool needs at least one connection",
            ));
        }
        Ok(())
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, value, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.projection_dispatch, ProjectionDispatchMode::Synchronous);
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("PROOFING_RETRY_MAX_ATTEMPTS", "5"),
            ("PROOFING_RETRY_BASE_DELAY_MS", "0"),
            ("PROOFING_PROJECTION_DISPATCH", "async"),
            ("PROOFING_LOG_FORMAT", "pretty"),
            ("DATABASE_URL", "postgres://localhost/proofing"),
        ]))
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::ZERO);
        assert_eq!(config.projection_dispatch, ProjectionDispatchMode::Asynchronous);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/proofing"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = EngineConfig::from_lookup(lookup(&[("PROOFING_RETRY_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROOFING_RETRY_MAX_ATTEMPTS", .. }));

        let err = EngineConfig::from_lookup(lookup(&[("PROOFING_RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROOFING_RETRY_MAX_ATTEMPTS", .. }));

        assert!(EngineConfig::from_lookup(lookup(&[("PROOFING_PROJECTION_DISPATCH", "later")])).is_err());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
            backoff_multiplier: 2.0,
        };

        assert_eq!(retry.delay_after(1), Duration::from_millis(10));
        assert_eq!(retry.delay_after(2), Duration::from_millis(20));
        assert_eq!(retry.delay_after(3), Duration::from_millis(35));
        assert_eq!(RetryConfig::immediate(3).delay_after(2), Duration::ZERO);
    }
}

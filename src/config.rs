use crate::errors::log::DEFAULT_LOG_CAPACITY;
use crate::retry::RetryPolicy;
use crate::status::{DEFAULT_NOTIFICATION_CAPACITY, MonitorConfig};
use serde::Serialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Process-wide defaults for the resilience engine.
///
/// Library components never read this directly; the composition root turns it into the
/// explicit settings each component takes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Attempts made by the retry executor's default policy.
    pub retry_max_attempts: u32,
    /// Delay after the first failed attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound on any single backoff delay.
    pub retry_max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub retry_backoff_multiplier: f64,
    /// Error log entries retained before eviction.
    pub error_log_capacity: usize,
    /// Processing notifications retained.
    pub notification_capacity: usize,
    /// Restart failed jobs automatically.
    pub job_auto_retry: bool,
    /// Restarts allowed per job.
    pub job_max_retries: u32,
    /// Delay before the first job restart; doubles per restart.
    pub job_retry_base_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            retry_backoff_multiplier: 2.0,
            error_log_capacity: DEFAULT_LOG_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            job_auto_retry: true,
            job_max_retries: 3,
            job_retry_base_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            retry_max_attempts: parse_or(
                &lookup,
                "RESILIENCE_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            retry_base_delay_ms: parse_or(
                &lookup,
                "RESILIENCE_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            )?,
            retry_max_delay_ms: parse_or(
                &lookup,
                "RESILIENCE_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            )?,
            retry_backoff_multiplier: parse_or(
                &lookup,
                "RESILIENCE_RETRY_BACKOFF_MULTIPLIER",
                defaults.retry_backoff_multiplier,
            )?,
            error_log_capacity: parse_or(
                &lookup,
                "RESILIENCE_ERROR_LOG_CAPACITY",
                defaults.error_log_capacity,
            )?,
            notification_capacity: parse_or(
                &lookup,
                "RESILIENCE_NOTIFICATION_CAPACITY",
                defaults.notification_capacity,
            )?,
            job_auto_retry: parse_or(
                &lookup,
                "RESILIENCE_JOB_AUTO_RETRY",
                defaults.job_auto_retry,
            )?,
            job_max_retries: parse_or(
                &lookup,
                "RESILIENCE_JOB_MAX_RETRIES",
                defaults.job_max_retries,
            )?,
            job_retry_base_ms: parse_or(
                &lookup,
                "RESILIENCE_JOB_RETRY_BASE_MS",
                defaults.job_retry_base_ms,
            )?,
        })
    }

    /// Default retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_max_attempts)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_backoff_multiplier(self.retry_backoff_multiplier)
    }

    /// Job monitor settings described by this configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            auto_retry: self.job_auto_retry,
            max_retries: self.job_max_retries,
            retry_base_delay: Duration::from_millis(self.job_retry_base_ms),
            notification_capacity: self.notification_capacity,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if [`init_config`] has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load `.env` and the environment, installing the result in the global cache.
///
/// Repeated calls return the configuration installed first.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        retry_max_attempts = config.retry_max_attempts,
        retry_base_delay_ms = config.retry_base_delay_ms,
        error_log_capacity = config.error_log_capacity,
        job_auto_retry = config.job_auto_retry,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

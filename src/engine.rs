//! Composition root owning one instance of each shared component.

use crate::config::Config;
use crate::errors::ErrorLog;
use crate::fallback::FallbackExecutor;
use crate::metrics::ResilienceMetrics;
use crate::recovery::RecoveryRegistry;
use crate::retry::RetryExecutor;
use crate::status::{NotificationPreferences, ProcessingStatusMonitor, StatusSource};
use std::sync::Arc;

/// Shared resilience components for one process.
///
/// Every executor logs into the same [`ErrorLog`] and counts into the same
/// [`ResilienceMetrics`].
pub struct ResilienceEngine {
    config: Config,
    log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
    retry: RetryExecutor,
    recovery: RecoveryRegistry,
    fallback: FallbackExecutor,
}

impl ResilienceEngine {
    /// Build the components described by `config`.
    pub fn new(config: &Config) -> Self {
        let metrics = Arc::new(ResilienceMetrics::new());
        let log = Arc::new(
            ErrorLog::new(config.error_log_capacity).with_metrics(Arc::clone(&metrics)),
        );

        tracing::debug!(
            retry_max_attempts = config.retry_max_attempts,
            error_log_capacity = config.error_log_capacity,
            "Resilience engine assembled"
        );

        Self {
            config: config.clone(),
            retry: RetryExecutor::new(
                Arc::clone(&log),
                Arc::clone(&metrics),
                config.retry_policy(),
            ),
            recovery: RecoveryRegistry::with_defaults(Arc::clone(&log), Arc::clone(&metrics)),
            fallback: FallbackExecutor::new(Arc::clone(&log), Arc::clone(&metrics)),
            log,
            metrics,
        }
    }

    /// Shared error log.
    pub fn log(&self) -> &Arc<ErrorLog> {
        &self.log
    }

    /// Shared counters.
    pub fn metrics(&self) -> &Arc<ResilienceMetrics> {
        &self.metrics
    }

    /// Retry executor using the configured default policy.
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Recovery registry with the default strategies.
    pub fn recovery(&self) -> &RecoveryRegistry {
        &self.recovery
    }

    /// Fallback executor.
    pub fn fallback(&self) -> &FallbackExecutor {
        &self.fallback
    }

    /// Job monitor reading from `source`, sharing this engine's log and metrics.
    pub fn monitor(
        &self,
        source: Arc<dyn StatusSource>,
        preferences: NotificationPreferences,
    ) -> ProcessingStatusMonitor {
        ProcessingStatusMonitor::new(
            source,
            Arc::clone(&self.log),
            Arc::clone(&self.metrics),
            self.config.monitor_config(),
            preferences,
        )
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing resilience activity.
#[derive(Default)]
pub struct ResilienceMetrics {
    errors_logged: AtomicU64,
    retries_scheduled: AtomicU64,
    retries_exhausted: AtomicU64,
    fallbacks_served: AtomicU64,
    fallback_chains_exhausted: AtomicU64,
    recoveries_succeeded: AtomicU64,
    job_restarts: AtomicU64,
}

impl ResilienceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry written to the error log.
    pub fn record_error_logged(&self) {
        self.errors_logged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backoff sleep scheduled before another attempt.
    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation that failed on its final permitted attempt.
    pub fn record_retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request satisfied by a fallback provider.
    pub fn record_fallback_served(&self) {
        self.fallbacks_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fallback chain in which every provider was skipped or failed.
    pub fn record_fallback_exhausted(&self) {
        self.fallback_chains_exhausted
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recovery strategy reporting success.
    pub fn record_recovery_succeeded(&self) {
        self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processing job restarted from the beginning.
    pub fn record_job_restart(&self) {
        self.job_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            errors_logged: self.errors_logged.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            fallbacks_served: self.fallbacks_served.load(Ordering::Relaxed),
            fallback_chains_exhausted: self.fallback_chains_exhausted.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            job_restarts: self.job_restarts.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of resilience counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Entries written to the error log since startup.
    pub errors_logged: u64,
    /// Backoff sleeps scheduled by the retry executor.
    pub retries_scheduled: u64,
    /// Operations that used up every attempt.
    pub retries_exhausted: u64,
    /// Requests answered by a fallback provider.
    pub fallbacks_served: u64,
    /// Fallback chains that ran out of providers.
    pub fallback_chains_exhausted: u64,
    /// Successful recovery strategy runs.
    pub recoveries_succeeded: u64,
    /// Processing jobs restarted after failure.
    pub job_restarts: u64,
}

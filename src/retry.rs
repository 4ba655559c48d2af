//! Exponential backoff retry executor.
//!
//! Every failure is classified and logged. Only failures that are both flagged retryable and
//! allow-listed by the policy are retried; anything else is logged at high severity and
//! returned immediately. The delay after attempt `n` is
//! `min(base_delay * backoff_multiplier^(n - 1), max_delay)`.
//!
//! This is the operation-level backoff. Restarting whole processing jobs uses a separate
//! `2^retry_count` schedule owned by [`crate::status::ProcessingStatusMonitor`].

use crate::errors::{ErrorContext, ErrorKind, ErrorLog, ErrorRecord, Severity, enhance};
use crate::metrics::ResilienceMetrics;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bounds and allow-list governing retries of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per completed attempt.
    pub backoff_multiplier: f64,
    /// Error kinds eligible for retry.
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_kinds: HashSet::from([
                ErrorKind::NetworkError,
                ErrorKind::ProcessingTimeout,
                ErrorKind::StorageError,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Preset for calls to remote services: more attempts, shorter first delay.
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retryable_kinds: HashSet::from([
                ErrorKind::NetworkError,
                ErrorKind::ProcessingTimeout,
                ErrorKind::SearchServiceUnavailable,
            ]),
        }
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the first delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Override the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Override the growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replace the retry allow-list.
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether `record` may be retried under this policy.
    pub fn should_retry(&self, record: &ErrorRecord) -> bool {
        record.retryable && self.retryable_kinds.contains(&record.kind)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Build an executor logging into `log` with `policy` as the default.
    pub fn new(log: Arc<ErrorLog>, metrics: Arc<ResilienceMetrics>, policy: RetryPolicy) -> Self {
        Self {
            log,
            metrics,
            policy,
        }
    }

    /// Default policy applied by [`RetryExecutor::execute`].
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` under the default policy.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        context: ErrorContext,
    ) -> Result<T, ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.execute_until(operation, context, &self.policy, std::future::pending())
            .await
    }

    /// Run `operation` under an explicit policy.
    pub async fn execute_with_policy<T, E, F, Fut>(
        &self,
        operation: F,
        context: ErrorContext,
        policy: &RetryPolicy,
    ) -> Result<T, ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.execute_until(operation, context, policy, std::future::pending())
            .await
    }

    /// Run `operation`, aborting any backoff sleep as soon as `cancel` completes.
    ///
    /// A cancelled wait returns a non-retryable `PROCESSING_TIMEOUT` record with
    /// `details.cancelled = true`; no further attempts are made.
    pub async fn execute_until<T, E, F, Fut, C>(
        &self,
        mut operation: F,
        context: ErrorContext,
        policy: &RetryPolicy,
        cancel: C,
    ) -> Result<T, ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        C: Future<Output = ()>,
    {
        let max_attempts = policy.attempts();
        tokio::pin!(cancel);

        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = %context.operation,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let record = enhance(error, &context);
            let attempt_context = context
                .clone()
                .with_metadata("attempt", attempt)
                .with_metadata("max_attempts", max_attempts);

            if !policy.should_retry(&record) {
                self.log.log_error(record.clone(), attempt_context, Severity::High);
                return Err(record);
            }

            if attempt >= max_attempts {
                self.log.log_error(
                    record.clone(),
                    attempt_context.with_metadata("retries_exhausted", true),
                    Severity::Critical,
                );
                self.metrics.record_retries_exhausted();
                tracing::warn!(
                    operation = %context.operation,
                    kind = %record.kind,
                    max_attempts,
                    "Retries exhausted"
                );
                return Err(record);
            }

            self.log.log_error(record.clone(), attempt_context, Severity::Low);

            let delay = policy.delay_for_attempt(attempt);
            self.metrics.record_retry_scheduled();
            tracing::debug!(
                operation = %context.operation,
                kind = %record.kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut cancel => {
                    let cancelled = ErrorRecord::new(
                        ErrorKind::ProcessingTimeout,
                        format!("{} cancelled during retry backoff", context.operation),
                    )
                    .with_retryable(false)
                    .with_detail("cancelled", true)
                    .with_detail("attempt", attempt)
                    .with_detail("last_error", record.kind.code());
                    self.log.log_error(
                        cancelled.clone(),
                        context.clone().with_metadata("attempt", attempt),
                        Severity::Medium,
                    );
                    return Err(cancelled);
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(log: &Arc<ErrorLog>) -> RetryExecutor {
        RetryExecutor::new(
            Arc::clone(log),
            Arc::new(ResilienceMetrics::new()),
            RetryPolicy::default(),
        )
    }

    fn failing_with(
        kind: ErrorKind,
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<(), ErrorRecord>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(ErrorRecord::from_kind(kind)))
        }
    }

    #[test]
    fn delays_grow_from_the_completed_attempt() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(1000));
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        for multiplier in [1.1, 1.5, 2.0, 3.7] {
            let policy = RetryPolicy::default()
                .with_base_delay(Duration::from_millis(50))
                .with_max_delay(Duration::from_secs(3))
                .with_backoff_multiplier(multiplier);
            let mut previous = Duration::ZERO;
            for attempt in 1..=64 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= previous, "attempt {attempt} shrank the delay");
                assert!(delay <= policy.max_delay);
                previous = delay;
            }
        }
    }

    #[test]
    fn should_retry_requires_flag_and_allow_list() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&ErrorRecord::from_kind(ErrorKind::NetworkError)));
        assert!(!policy.should_retry(
            &ErrorRecord::from_kind(ErrorKind::NetworkError).with_retryable(false)
        ));
        assert!(!policy.should_retry(&ErrorRecord::from_kind(ErrorKind::EmbeddingFailed)));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded_by_policy() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(4);

        let error = executor(&log)
            .execute_with_policy(
                failing_with(ErrorKind::NetworkError, &calls),
                ErrorContext::new("flaky"),
                &policy,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(error.kind, ErrorKind::NetworkError);
        let entries = log.entries();
        assert_eq!(entries.len(), 4);
        let last = entries.last().unwrap();
        assert_eq!(last.severity, Severity::Critical);
        assert_eq!(last.context.metadata["retries_exhausted"], true);
        assert!(entries[..3].iter().all(|entry| entry.severity == Severity::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_short_circuit() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicU32::new(0));

        let error = executor(&log)
            .execute(
                failing_with(ErrorKind::InvalidFileFormat, &calls),
                ErrorContext::new("upload"),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.kind, ErrorKind::InvalidFileFormat);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::High);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_logs_once() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(1);

        executor(&log)
            .execute_with_policy(
                failing_with(ErrorKind::NetworkError, &calls),
                ErrorContext::new("once"),
                &policy,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_failures_are_not_retried() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let error = executor(&log)
            .execute(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(anyhow::anyhow!("mystery")) }
                },
                ErrorContext::new("mystery"),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.kind, ErrorKind::UnknownError);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_backoff_wait() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_secs(60));

        let cancel = tokio::time::sleep(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let error = executor(&log)
            .execute_until(
                failing_with(ErrorKind::NetworkError, &calls),
                ErrorContext::new("cancellable"),
                &policy,
                cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.kind, ErrorKind::ProcessingTimeout);
        assert!(!error.retryable);
        assert_eq!(error.details["cancelled"], true);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}

//! Best-effort remediation run after a failure is classified and before a caller gives up.
//!
//! Strategies are consulted in registration order, filtered by the error kinds they declare.
//! The first strategy reporting success wins. A strategy that errors or panics is skipped.
//! Nothing here is wired into [`crate::retry::RetryExecutor`]; callers opt in explicitly.

use crate::errors::{ErrorContext, ErrorKind, ErrorLog, ErrorRecord, Severity};
use crate::metrics::ResilienceMetrics;
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Remediation action applicable to a set of error kinds.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Whether this strategy handles failures of `kind`.
    fn applies_to(&self, kind: ErrorKind) -> bool;

    /// Attempt remediation. `Ok(true)` means the caller may retry the operation.
    async fn execute(&self, record: &ErrorRecord, context: &ErrorContext) -> anyhow::Result<bool>;
}

/// Waits a fixed period and then signals "try again".
///
/// Success is never verified here; the next attempt of the operation decides.
pub struct PauseStrategy {
    name: String,
    kinds: HashSet<ErrorKind>,
    pause: Duration,
}

impl PauseStrategy {
    /// Pause for `pause` whenever one of `kinds` fails.
    pub fn new(
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = ErrorKind>,
        pause: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            kinds: kinds.into_iter().collect(),
            pause,
        }
    }

    /// Two-second pause for network failures.
    pub fn network_retry() -> Self {
        Self::new(
            "network-retry",
            [ErrorKind::NetworkError],
            Duration::from_secs(2),
        )
    }

    /// One-second pause for storage failures.
    pub fn storage_retry() -> Self {
        Self::new(
            "storage-retry",
            [ErrorKind::StorageError],
            Duration::from_secs(1),
        )
    }
}

#[async_trait]
impl RecoveryStrategy for PauseStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, kind: ErrorKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn execute(
        &self,
        _record: &ErrorRecord,
        _context: &ErrorContext,
    ) -> anyhow::Result<bool> {
        tokio::time::sleep(self.pause).await;
        Ok(true)
    }
}

type StrategyFn =
    dyn Fn(ErrorRecord, ErrorContext) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// Strategy backed by an async closure.
pub struct FnStrategy {
    name: String,
    kinds: HashSet<ErrorKind>,
    run: Box<StrategyFn>,
}

impl FnStrategy {
    /// Wrap `run` as a strategy for `kinds`.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = ErrorKind>,
        run: F,
    ) -> Self
    where
        F: Fn(ErrorRecord, ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kinds: kinds.into_iter().collect(),
            run: Box::new(move |record, context| run(record, context).boxed()),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for FnStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, kind: ErrorKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn execute(&self, record: &ErrorRecord, context: &ErrorContext) -> anyhow::Result<bool> {
        (self.run)(record.clone(), context.clone()).await
    }
}

/// Ordered collection of [`RecoveryStrategy`] implementations.
pub struct RecoveryRegistry {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
}

impl RecoveryRegistry {
    /// Empty registry.
    pub fn new(log: Arc<ErrorLog>, metrics: Arc<ResilienceMetrics>) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            log,
            metrics,
        }
    }

    /// Registry preloaded with the network and storage pause strategies.
    pub fn with_defaults(log: Arc<ErrorLog>, metrics: Arc<ResilienceMetrics>) -> Self {
        let registry = Self::new(log, metrics);
        registry.register(PauseStrategy::network_retry());
        registry.register(PauseStrategy::storage_retry());
        registry
    }

    /// Append a strategy; it runs after every strategy registered before it.
    pub fn register<S>(&self, strategy: S)
    where
        S: RecoveryStrategy + 'static,
    {
        tracing::debug!(strategy = strategy.name(), "Registered recovery strategy");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(strategy));
    }

    /// Names of registered strategies in execution order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    /// Run applicable strategies until one succeeds. Returns whether any did.
    pub async fn attempt_recovery(&self, record: &ErrorRecord, context: &ErrorContext) -> bool {
        let candidates: Vec<Arc<dyn RecoveryStrategy>> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|strategy| strategy.applies_to(record.kind))
            .cloned()
            .collect();

        for strategy in candidates {
            let outcome = AssertUnwindSafe(strategy.execute(record, context))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(true)) => {
                    self.log.log_error(
                        record.clone(),
                        context
                            .clone()
                            .with_metadata("recovery_strategy", strategy.name())
                            .with_metadata("recovery", "succeeded"),
                        Severity::Low,
                    );
                    self.metrics.record_recovery_succeeded();
                    tracing::info!(
                        strategy = strategy.name(),
                        kind = %record.kind,
                        "Recovery succeeded"
                    );
                    return true;
                }
                Ok(Ok(false)) => {
                    tracing::debug!(strategy = strategy.name(), "Recovery declined");
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %error,
                        "Recovery strategy failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(strategy = strategy.name(), "Recovery strategy panicked");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry() -> (RecoveryRegistry, Arc<ErrorLog>) {
        let log = Arc::new(ErrorLog::default());
        let registry = RecoveryRegistry::new(Arc::clone(&log), Arc::new(ResilienceMetrics::new()));
        (registry, log)
    }

    fn recording(
        name: &'static str,
        result: bool,
        seen: &Arc<Mutex<Vec<&'static str>>>,
    ) -> FnStrategy {
        let seen = Arc::clone(seen);
        FnStrategy::new(name, [ErrorKind::NetworkError], move |_, _| {
            seen.lock().unwrap().push(name);
            async move { Ok(result) }
        })
    }

    #[tokio::test]
    async fn first_success_wins_and_is_logged() {
        let (registry, log) = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording("declines", false, &seen));
        registry.register(recording("succeeds", true, &seen));
        registry.register(recording("never-run", true, &seen));

        let record = ErrorRecord::from_kind(ErrorKind::NetworkError);
        let recovered = registry
            .attempt_recovery(&record, &ErrorContext::new("search"))
            .await;

        assert!(recovered);
        assert_eq!(*seen.lock().unwrap(), vec!["declines", "succeeds"]);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Low);
        assert_eq!(entries[0].context.metadata["recovery_strategy"], "succeeds");
    }

    struct Panicking;

    #[async_trait]
    impl RecoveryStrategy for Panicking {
        fn name(&self) -> &str {
            "panics"
        }

        fn applies_to(&self, _kind: ErrorKind) -> bool {
            true
        }

        async fn execute(&self, _: &ErrorRecord, _: &ErrorContext) -> anyhow::Result<bool> {
            panic!("strategy bug")
        }
    }

    #[tokio::test]
    async fn failing_strategies_are_skipped() {
        let (registry, _log) = registry();
        registry.register(FnStrategy::new(
            "errors",
            [ErrorKind::StorageError],
            |_, _| async { Err(anyhow::anyhow!("backend gone")) },
        ));
        registry.register(Panicking);
        registry.register(FnStrategy::new(
            "works",
            [ErrorKind::StorageError],
            |_, _| async { Ok(true) },
        ));

        let record = ErrorRecord::from_kind(ErrorKind::StorageError);
        assert!(
            registry
                .attempt_recovery(&record, &ErrorContext::new("save"))
                .await
        );
    }

    #[tokio::test]
    async fn inapplicable_kinds_return_false() {
        let (registry, log) = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording("network-only", true, &seen));

        let record = ErrorRecord::from_kind(ErrorKind::QueryTooShort);
        assert!(
            !registry
                .attempt_recovery(&record, &ErrorContext::new("search"))
                .await
        );
        assert!(seen.lock().unwrap().is_empty());
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_strategies_pause_then_signal_retry() {
        let log = Arc::new(ErrorLog::default());
        let registry = RecoveryRegistry::with_defaults(log, Arc::new(ResilienceMetrics::new()));
        assert_eq!(
            registry.strategy_names(),
            vec!["network-retry".to_string(), "storage-retry".to_string()]
        );

        let started = tokio::time::Instant::now();
        let record = ErrorRecord::from_kind(ErrorKind::NetworkError);
        assert!(
            registry
                .attempt_recovery(&record, &ErrorContext::new("fetch"))
                .await
        );
        assert!(started.elapsed() >= Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let record = ErrorRecord::from_kind(ErrorKind::StorageError);
        assert!(
            registry
                .attempt_recovery(&record, &ErrorContext::new("save"))
                .await
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }
}

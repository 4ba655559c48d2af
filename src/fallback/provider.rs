//! Alternate ways of satisfying a request when the primary operation fails.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type ExecuteFn<T> = dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync;
type AvailabilityFn = dyn Fn() -> bool + Send + Sync;

/// A named, prioritized fallback for one logical service.
///
/// Higher `priority` runs first. The availability probe is consulted right before each use,
/// so a provider can opt out cheaply (e.g. a cache with nothing in it yet).
pub struct FallbackProvider<T> {
    name: String,
    priority: i32,
    enabled: bool,
    timeout: Option<Duration>,
    execute: Arc<ExecuteFn<T>>,
    is_available: Arc<AvailabilityFn>,
}

impl<T: Send + 'static> FallbackProvider<T> {
    /// Create an enabled, always-available provider.
    pub fn new<F, Fut>(name: impl Into<String>, priority: i32, execute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            timeout: None,
            execute: Arc::new(move || execute().boxed()),
            is_available: Arc::new(|| true),
        }
    }

    /// Gate the provider on `probe`.
    pub fn with_availability<A>(mut self, probe: A) -> Self
    where
        A: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_available = Arc::new(probe);
        self
    }

    /// Bound each invocation; an elapsed timeout counts as a provider failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set whether the provider starts enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordering key; higher runs first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Initial enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run the availability probe.
    pub fn is_available(&self) -> bool {
        (self.is_available)()
    }

    pub(crate) async fn run(&self) -> anyhow::Result<T> {
        match self.timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, (self.execute)()).await??),
            None => (self.execute)().await,
        }
    }
}

impl<T> std::fmt::Debug for FallbackProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProvider")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_the_wrapped_operation() {
        let provider = FallbackProvider::new("cache", 10, || async { Ok(vec![1, 2, 3]) });
        assert_eq!(provider.run().await.unwrap(), vec![1, 2, 3]);
        assert!(provider.is_available());
        assert!(provider.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_turns_a_hang_into_a_failure() {
        let provider = FallbackProvider::new("hung", 1, || async {
            std::future::pending::<()>().await;
            Ok(0_u8)
        })
        .with_timeout(Duration::from_secs(5));

        let error = provider.run().await.unwrap_err();
        assert!(error.is::<tokio::time::error::Elapsed>());
    }

    #[test]
    fn availability_probe_is_consulted() {
        let provider = FallbackProvider::new("empty-cache", 5, || async { Ok(()) })
            .with_availability(|| false);
        assert!(!provider.is_available());
    }
}

//! Primary-then-fallback execution for named logical services.
//!
//! Providers run one at a time in descending priority; the first success short-circuits the
//! chain. Provider lists are stored type-erased per service, so one executor can serve
//! services with different result types. A provider whose result type does not match the
//! call is skipped.

use crate::errors::{ErrorContext, ErrorLog, ErrorRecord, Severity, enhance};
use crate::fallback::provider::FallbackProvider;
use crate::metrics::ResilienceMetrics;
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;

/// Last observed state of a logical service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Outcome of the most recent primary attempt.
    pub is_healthy: bool,
    /// When the primary was last attempted; `None` if never.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked_at: Option<OffsetDateTime>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_checked_at: None,
        }
    }
}

/// Registration metadata for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    /// Provider name.
    pub name: String,
    /// Ordering key; higher runs first.
    pub priority: i32,
    /// Whether the provider takes part in chains.
    pub enabled: bool,
}

struct RegisteredProvider {
    info: ProviderInfo,
    provider: Arc<dyn Any + Send + Sync>,
}

/// Runs primary operations and walks registered fallbacks when they fail.
pub struct FallbackExecutor {
    providers: RwLock<HashMap<String, Vec<RegisteredProvider>>>,
    health: RwLock<HashMap<String, ServiceHealth>>,
    log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
}

impl FallbackExecutor {
    /// Executor logging primary failures into `log`.
    pub fn new(log: Arc<ErrorLog>, metrics: Arc<ResilienceMetrics>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            log,
            metrics,
        }
    }

    /// Register `provider` for `service`, keeping the list sorted by descending priority.
    ///
    /// Providers with equal priority run in registration order.
    pub fn register_fallback<T>(&self, service: &str, provider: FallbackProvider<T>)
    where
        T: Send + 'static,
    {
        let info = ProviderInfo {
            name: provider.name().to_string(),
            priority: provider.priority(),
            enabled: provider.is_enabled(),
        };
        tracing::debug!(
            service,
            provider = %info.name,
            priority = info.priority,
            "Registered fallback provider"
        );

        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let chain = providers.entry(service.to_string()).or_default();
        chain.push(RegisteredProvider {
            info,
            provider: Arc::new(provider),
        });
        chain.sort_by(|a, b| b.info.priority.cmp(&a.info.priority));
    }

    /// Enable or disable a registered provider. Returns whether it was found.
    pub fn set_enabled(&self, service: &str, provider: &str, enabled: bool) -> bool {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = providers
            .get_mut(service)
            .and_then(|chain| chain.iter_mut().find(|slot| slot.info.name == provider))
        else {
            return false;
        };
        slot.info.enabled = enabled;
        true
    }

    /// Providers registered for `service` in execution order.
    pub fn providers(&self, service: &str) -> Vec<ProviderInfo> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .map(|chain| chain.iter().map(|slot| slot.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Run `primary`; on failure, try enabled and available fallbacks for `service`.
    ///
    /// If every fallback is skipped or fails, the classified primary error is returned with
    /// `details.fallback_attempts` set to the number of providers actually invoked.
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        service: &str,
        primary: F,
        context: ErrorContext,
    ) -> Result<T, ErrorRecord>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let error = match primary().await {
            Ok(value) => {
                self.record_health(service, true);
                return Ok(value);
            }
            Err(error) => error,
        };

        self.record_health(service, false);
        let record = enhance(error, &context);
        self.log
            .log(record.clone(), context.clone().with_metadata("service", service));
        tracing::warn!(service, kind = %record.kind, "Primary operation failed; trying fallbacks");

        let mut attempted = 0_u32;
        for provider in self.chain_for::<T>(service) {
            match catch_unwind(AssertUnwindSafe(|| provider.is_available())) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(service, provider = provider.name(), "Fallback unavailable");
                    continue;
                }
                Err(_) => {
                    tracing::error!(
                        service,
                        provider = provider.name(),
                        "Fallback availability probe panicked"
                    );
                    continue;
                }
            }

            attempted += 1;
            match AssertUnwindSafe(provider.run()).catch_unwind().await {
                Ok(Ok(value)) => {
                    self.log.log_error(
                        record.clone(),
                        context
                            .clone()
                            .with_metadata("service", service)
                            .with_metadata("fallback_provider", provider.name())
                            .with_metadata("fallback", "succeeded"),
                        Severity::Low,
                    );
                    self.metrics.record_fallback_served();
                    tracing::info!(service, provider = provider.name(), "Served by fallback");
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        service,
                        provider = provider.name(),
                        error = %error,
                        "Fallback provider failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        service,
                        provider = provider.name(),
                        "Fallback provider panicked"
                    );
                }
            }
        }

        self.metrics.record_fallback_exhausted();
        tracing::warn!(service, attempted, "Fallback chain exhausted");
        Err(record
            .with_detail("fallback_attempts", attempted)
            .with_detail("service", service))
    }

    /// Health of `service`; unknown services are reported healthy and never checked.
    pub fn service_health(&self, service: &str) -> ServiceHealth {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .copied()
            .unwrap_or_default()
    }

    /// Health of every service attempted so far, keyed by name.
    pub fn all_service_health(&self) -> BTreeMap<String, ServiceHealth> {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, health)| (name.clone(), *health))
            .collect()
    }

    fn record_health(&self, service: &str, is_healthy: bool) {
        self.health
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                service.to_string(),
                ServiceHealth {
                    is_healthy,
                    last_checked_at: Some(OffsetDateTime::now_utc()),
                },
            );
    }

    fn chain_for<T>(&self, service: &str) -> Vec<Arc<FallbackProvider<T>>>
    where
        T: Send + 'static,
    {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let Some(chain) = providers.get(service) else {
            return Vec::new();
        };

        chain
            .iter()
            .filter(|slot| slot.info.enabled)
            .filter_map(|slot| {
                let typed = Arc::clone(&slot.provider)
                    .downcast::<FallbackProvider<T>>()
                    .ok();
                if typed.is_none() {
                    tracing::warn!(
                        service,
                        provider = %slot.info.name,
                        "Skipping fallback with mismatched result type"
                    );
                }
                typed
            })
            .collect()
    }
}

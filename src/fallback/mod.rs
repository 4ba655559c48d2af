//! Priority-ordered fallback providers and per-service health tracking.

pub mod executor;
pub mod provider;

pub use executor::{FallbackExecutor, ProviderInfo, ServiceHealth};
pub use provider::FallbackProvider;

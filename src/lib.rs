#![deny(missing_docs)]

//! Core library for the Rusty Resilience engine.
//!
//! Classifies failures, retries transient ones with backoff, routes around unavailable
//! services through ranked fallback providers, and tracks long-running document
//! processing jobs.

/// Environment-driven configuration management.
pub mod config;
/// Composition root wiring the shared components together.
pub mod engine;
/// Error taxonomy, classification, and the in-memory error log.
pub mod errors;
/// Priority-ordered fallback providers and service health tracking.
pub mod fallback;
/// Structured logging and tracing setup.
pub mod logging;
/// Resilience counters shared across executors.
pub mod metrics;
/// Typed listener registry with explicit subscription handles.
pub mod pubsub;
/// Best-effort recovery strategies keyed by error kind.
pub mod recovery;
/// Exponential backoff retry executor.
pub mod retry;
/// Processing job state machine, notifications, and status sources.
pub mod status;

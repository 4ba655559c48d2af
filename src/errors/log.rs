//! In-memory error log with resolution tracking and synchronous listeners.
//!
//! The log is the sink for failures observed anywhere in the engine, so nothing on its own
//! path returns an error. Entries are kept in arrival order up to a retention cap, after which
//! the oldest entries are evicted. Listeners run after the entry is stored and after every
//! lock has been released, so a listener may read from or write to the log itself.

use crate::errors::kind::{ErrorCategory, Severity};
use crate::errors::record::{ErrorContext, ErrorRecord, generate_id};
use crate::metrics::ResilienceMetrics;
use crate::pubsub::{ListenerSet, Subscription};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

/// Default number of entries retained before the oldest are evicted.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// A logged failure plus its triage state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    /// Identifier returned by [`ErrorLog::log_error`].
    pub id: String,
    /// The normalized failure.
    pub error: ErrorRecord,
    /// Urgency assigned by the caller.
    pub severity: Severity,
    /// Functional area derived from the error kind.
    pub category: ErrorCategory,
    /// Where the failure happened.
    pub context: ErrorContext,
    /// Whether someone marked the failure as handled.
    pub resolved: bool,
    /// When the entry was first resolved.
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    /// Free-form resolution note.
    pub resolution: Option<String>,
}

/// Aggregate counts over the retained entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatistics {
    /// Number of retained entries.
    pub total: usize,
    /// Entries marked resolved.
    pub resolved: usize,
    /// Entries per severity.
    pub by_severity: BTreeMap<Severity, usize>,
    /// Entries per category.
    pub by_category: BTreeMap<ErrorCategory, usize>,
}

/// Shared store of [`ErrorLogEntry`] values.
pub struct ErrorLog {
    entries: RwLock<VecDeque<ErrorLogEntry>>,
    capacity: usize,
    listeners: ListenerSet<ErrorLogEntry>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl ErrorLog {
    /// Create a log retaining at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            listeners: ListenerSet::new(),
            metrics: None,
        }
    }

    /// Count logged entries in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ResilienceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Store a failure at the default (medium) severity.
    pub fn log(&self, record: ErrorRecord, context: ErrorContext) -> String {
        self.log_error(record, context, Severity::default())
    }

    /// Store a failure, notify listeners in registration order, and return the entry id.
    pub fn log_error(
        &self,
        record: ErrorRecord,
        context: ErrorContext,
        severity: Severity,
    ) -> String {
        let entry = ErrorLogEntry {
            id: generate_id("log"),
            category: record.kind.category(),
            error: record,
            severity,
            context,
            resolved: false,
            resolved_at: None,
            resolution: None,
        };
        trace_entry(&entry);

        let id = entry.id.clone();
        {
            let mut entries = self.write();
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_error_logged();
        }

        let failures = self.listeners.emit(&entry);
        if failures > 0 {
            tracing::warn!(entry_id = %id, failures, "Error log listeners failed");
        }
        id
    }

    /// Mark an entry as resolved.
    ///
    /// Only the first call takes effect; later calls (and unknown ids) leave the log untouched.
    /// Returns whether the entry transitioned to resolved.
    pub fn resolve_error(&self, id: &str, resolution: impl Into<String>) -> bool {
        let mut entries = self.write();
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) if !entry.resolved => {
                entry.resolved = true;
                entry.resolved_at = Some(OffsetDateTime::now_utc());
                entry.resolution = Some(resolution.into());
                tracing::debug!(entry_id = id, "Error resolved");
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(entry_id = id, "Resolve requested for unknown entry");
                false
            }
        }
    }

    /// Aggregate counts over the retained entries.
    pub fn statistics(&self) -> ErrorStatistics {
        let entries = self.read();
        let mut stats = ErrorStatistics {
            total: entries.len(),
            ..ErrorStatistics::default()
        };
        for entry in entries.iter() {
            if entry.resolved {
                stats.resolved += 1;
            }
            *stats.by_severity.entry(entry.severity).or_default() += 1;
            *stats.by_category.entry(entry.category).or_default() += 1;
        }
        stats
    }

    /// Register a callback invoked synchronously for every new entry.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ErrorLogEntry) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Snapshot of retained entries, oldest first.
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.read().iter().cloned().collect()
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorLogEntry> {
        self.read().iter().rev().take(limit).cloned().collect()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Option<ErrorLogEntry> {
        self.read().iter().find(|entry| entry.id == id).cloned()
    }

    /// Entries not yet resolved, oldest first.
    pub fn unresolved(&self) -> Vec<ErrorLogEntry> {
        self.read()
            .iter()
            .filter(|entry| !entry.resolved)
            .cloned()
            .collect()
    }

    /// Drop every retained entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<ErrorLogEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<ErrorLogEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

fn trace_entry(entry: &ErrorLogEntry) {
    let kind = entry.error.kind;
    let operation = entry.context.operation.as_str();
    let message = entry.error.message.as_str();
    match entry.severity {
        Severity::Low => tracing::debug!(%kind, operation, message, "Error logged"),
        Severity::Medium => tracing::info!(%kind, operation, message, "Error logged"),
        Severity::High => tracing::warn!(%kind, operation, message, "Error logged"),
        Severity::Critical => tracing::error!(%kind, operation, message, "Error logged"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::kind::ErrorKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(kind: ErrorKind) -> ErrorRecord {
        ErrorRecord::from_kind(kind)
    }

    #[test]
    fn log_assigns_category_and_returns_id() {
        let log = ErrorLog::default();
        let id = log.log_error(
            record(ErrorKind::FileTooLarge),
            ErrorContext::new("upload"),
            Severity::High,
        );

        let entry = log.get(&id).expect("entry stored");
        assert_eq!(entry.category, ErrorCategory::Validation);
        assert_eq!(entry.severity, Severity::High);
        assert!(!entry.resolved);
    }

    #[test]
    fn resolving_twice_keeps_first_resolution() {
        let log = ErrorLog::default();
        let id = log.log(record(ErrorKind::NetworkError), ErrorContext::new("search"));

        assert!(log.resolve_error(&id, "x"));
        let first = log.get(&id).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!log.resolve_error(&id, "y"));
        let second = log.get(&id).unwrap();

        assert_eq!(first.resolved_at, second.resolved_at);
        assert_eq!(second.resolution.as_deref(), Some("x"));
    }

    #[test]
    fn resolving_unknown_id_is_a_no_op() {
        let log = ErrorLog::default();
        assert!(!log.resolve_error("missing", "note"));
        assert!(log.is_empty());
    }

    #[test]
    fn statistics_aggregate_by_severity_and_category() {
        let log = ErrorLog::default();
        let context = || ErrorContext::new("op");
        let id = log.log_error(record(ErrorKind::NetworkError), context(), Severity::Low);
        log.log_error(record(ErrorKind::NetworkError), context(), Severity::Critical);
        log.log_error(record(ErrorKind::StorageError), context(), Severity::Low);
        log.resolve_error(&id, "recovered");

        let stats = log.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.by_severity[&Severity::Low], 2);
        assert_eq!(stats.by_severity[&Severity::Critical], 1);
        assert_eq!(stats.by_category[&ErrorCategory::Network], 2);
        assert_eq!(stats.by_category[&ErrorCategory::Storage], 1);
    }

    #[test]
    fn listeners_fire_in_order_and_failures_are_isolated() {
        let log = ErrorLog::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        log.add_listener(move |_| first.lock().unwrap().push("first"))
            .detach();
        log.add_listener(|_| panic!("faulty listener")).detach();
        let third = Arc::clone(&order);
        log.add_listener(move |_| third.lock().unwrap().push("third"))
            .detach();

        let id = log.log(record(ErrorKind::UnknownError), ErrorContext::new("op"));
        assert!(log.get(&id).is_some());
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn listener_may_write_back_into_the_log() {
        let log = Arc::new(ErrorLog::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&log);
        let counter = Arc::clone(&calls);
        log.add_listener(move |entry| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                inner.resolve_error(&entry.id, "auto-acknowledged");
            }
        })
        .detach();

        let id = log.log(record(ErrorKind::StorageError), ErrorContext::new("op"));
        assert!(log.get(&id).unwrap().resolved);
    }

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let log = ErrorLog::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = log.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        log.log(record(ErrorKind::StorageError), ErrorContext::new("op"));
        subscription.unsubscribe();
        log.log(record(ErrorKind::StorageError), ErrorContext::new("op"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retention_evicts_oldest_entries() {
        let log = ErrorLog::new(2);
        let first = log.log(record(ErrorKind::StorageError), ErrorContext::new("a"));
        log.log(record(ErrorKind::StorageError), ErrorContext::new("b"));
        log.log(record(ErrorKind::StorageError), ErrorContext::new("c"));

        assert_eq!(log.len(), 2);
        assert!(log.get(&first).is_none());
        let recent = log.recent(1);
        assert_eq!(recent[0].context.operation, "c");
    }

    #[test]
    fn concurrent_logging_loses_no_entries() {
        let log = Arc::new(ErrorLog::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        log.log(record(ErrorKind::NetworkError), ErrorContext::new("op"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }

    #[test]
    fn metrics_count_logged_entries() {
        let metrics = Arc::new(ResilienceMetrics::new());
        let log = ErrorLog::default().with_metrics(Arc::clone(&metrics));
        log.log(record(ErrorKind::NetworkError), ErrorContext::new("op"));
        assert_eq!(metrics.snapshot().errors_logged, 1);
    }
}

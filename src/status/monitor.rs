//! Per-job processing state machine with auto-retry and subscriber fan-out.
//!
//! Each monitored job owns a slot holding its state, its subscription task, and at most one
//! pending auto-retry timer. Updates for one job are applied under that job's lock in arrival
//! order; different jobs never contend. Listeners, hooks, and the error log are always called
//! after the job lock has been released.

use crate::errors::{ErrorContext, ErrorKind, ErrorLog, ErrorRecord, Severity, enhance};
use crate::metrics::ResilienceMetrics;
use crate::pubsub::{ListenerSet, Subscription};
use crate::status::notifications::{DEFAULT_NOTIFICATION_CAPACITY, NotificationCenter};
use crate::status::preferences::{NotificationPreferences, PreferenceError, PreferenceStore};
use crate::status::source::StatusSource;
use crate::status::types::{
    NotificationType, ProcessingNotification, ProcessingStage, ProcessingStatusState,
    StatusUpdate,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

const COMPONENT: &str = "status_monitor";

/// Auto-retry and retention settings for a [`ProcessingStatusMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Restart failed jobs automatically.
    pub auto_retry: bool,
    /// Restarts allowed per job before it stays failed.
    pub max_retries: u32,
    /// Delay before the first restart; doubles with every restart already made.
    pub retry_base_delay: Duration,
    /// Notifications kept in the ring buffer.
    pub notification_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_retry: true,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Job restart delay after `retry_count` restarts: `base * 2^retry_count`.
    pub fn restart_delay(&self, retry_count: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2_u32.saturating_pow(retry_count))
    }
}

type CompleteHook = Arc<dyn Fn(&ProcessingStatusState) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &ErrorRecord) + Send + Sync>;

/// Callbacks for one monitored job.
#[derive(Clone, Default)]
pub struct MonitorHooks {
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
}

impl MonitorHooks {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the job reaches `Completed`.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProcessingStatusState) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Called when the job fails or its update stream reports an error.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &ErrorRecord) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for MonitorHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHooks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Broadcast to [`ProcessingStatusMonitor::subscribe`] listeners.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A job's tracked state changed.
    StatusChanged(ProcessingStatusState),
    /// A notification was recorded and the preferences allow announcing it.
    Notification(ProcessingNotification),
    /// A job's state was removed.
    Cleared(String),
}

/// What [`ProcessingStatusMonitor::on_status_update`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Merged into the job's state.
    Applied,
    /// Dropped because its sequence number was not newer than the last applied one.
    Stale,
    /// Dropped because the stage transition is not allowed.
    Rejected,
    /// Dropped because the job is not tracked.
    Untracked,
}

struct JobSlot {
    state: ProcessingStatusState,
    last_sequence: Option<u64>,
    hooks: MonitorHooks,
    subscription: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl JobSlot {
    fn stop(&mut self) {
        if let Some(task) = self.subscription.take() {
            task.abort();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

type SharedSlot = Arc<Mutex<JobSlot>>;

struct MonitorInner {
    source: Arc<dyn StatusSource>,
    jobs: RwLock<HashMap<String, SharedSlot>>,
    notifications: NotificationCenter,
    preferences: RwLock<NotificationPreferences>,
    listeners: ListenerSet<MonitorEvent>,
    log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
    config: MonitorConfig,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in jobs.values() {
            lock_slot(slot).stop();
        }
    }
}

/// Tracks processing jobs reported by a [`StatusSource`].
///
/// Cloning is cheap; clones share the same jobs, notifications, and listeners.
#[derive(Clone)]
pub struct ProcessingStatusMonitor {
    inner: Arc<MonitorInner>,
}

impl ProcessingStatusMonitor {
    /// Monitor reading from `source` and logging failures into `log`.
    pub fn new(
        source: Arc<dyn StatusSource>,
        log: Arc<ErrorLog>,
        metrics: Arc<ResilienceMetrics>,
        config: MonitorConfig,
        preferences: NotificationPreferences,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                jobs: RwLock::new(HashMap::new()),
                notifications: NotificationCenter::new(config.notification_capacity),
                preferences: RwLock::new(preferences),
                listeners: ListenerSet::new(),
                log,
                metrics,
                config,
            }),
        }
    }

    /// Start tracking `job_id` without callbacks.
    pub async fn start_monitoring(&self, job_id: &str) {
        self.start_monitoring_with(job_id, MonitorHooks::new()).await;
    }

    /// Start tracking `job_id`, seeding state from the source's current snapshot.
    ///
    /// Monitoring an already tracked job replaces its subscription, hooks, and state.
    pub async fn start_monitoring_with(&self, job_id: &str, hooks: MonitorHooks) {
        let snapshot = match self.inner.source.current_status(job_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                let context = self.context("start_monitoring", job_id);
                let record = enhance(error, &context);
                tracing::warn!(
                    job_id,
                    error = %record,
                    "Status snapshot unavailable; starting at uploading"
                );
                self.inner.log.log(record, context);
                None
            }
        };

        let mut state = ProcessingStatusState::new(job_id);
        let mut last_sequence = None;
        if let Some(update) = snapshot {
            last_sequence = update.sequence;
            merge_update(&mut state, &update);
        }

        // Open the stream before registering so updates published meanwhile are queued.
        let stream = self.inner.source.subscribe(job_id);
        let slot: SharedSlot = Arc::new(Mutex::new(JobSlot {
            state: state.clone(),
            last_sequence,
            hooks,
            subscription: None,
            retry_timer: None,
        }));

        let previous = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), Arc::clone(&slot));
        if let Some(previous) = previous {
            lock_slot(&previous).stop();
        }

        let weak = Arc::downgrade(&self.inner);
        let own_slot = Arc::downgrade(&slot);
        let job = job_id.to_string();
        // The task locks the slot before applying anything, so it cannot observe the job as
        // unmonitored while the handle is being stored.
        {
            let mut guard = lock_slot(&slot);
            guard.subscription = Some(tokio::spawn(async move {
                let mut stream = stream;
                while let Some(item) = stream.next().await {
                    let Some(inner) = weak.upgrade() else { return };
                    let monitor = ProcessingStatusMonitor { inner };
                    match item {
                        Ok(update) if update.job_id == job => {
                            monitor.on_status_update(update);
                        }
                        Ok(update) => {
                            tracing::warn!(
                                job_id = %job,
                                received = %update.job_id,
                                "Ignoring update for another job"
                            );
                        }
                        Err(record) => monitor.handle_stream_error(&job, record),
                    }
                }
                tracing::debug!(job_id = %job, "Status stream ended");
                if let Some(slot) = own_slot.upgrade() {
                    let mut slot = lock_slot(&slot);
                    slot.subscription = None;
                    if let Some(timer) = slot.retry_timer.take() {
                        timer.abort();
                    }
                }
            }));
        }

        tracing::info!(job_id, status = %state.status, "Monitoring started");
        self.inner.listeners.emit(&MonitorEvent::StatusChanged(state));
    }

    /// Stop receiving updates for `job_id` and cancel any pending auto-retry.
    ///
    /// The tracked state is kept. Returns whether the job was being monitored.
    pub fn stop_monitoring(&self, job_id: &str) -> bool {
        let Some(slot) = self.slot(job_id) else {
            return false;
        };
        let mut slot = lock_slot(&slot);
        let was_monitoring = slot.subscription.is_some();
        slot.stop();
        was_monitoring
    }

    /// Stop monitoring `job_id` and forget its state.
    pub fn clear_status(&self, job_id: &str) -> bool {
        let removed = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
        let Some(slot) = removed else {
            return false;
        };
        lock_slot(&slot).stop();
        tracing::debug!(job_id, "Status cleared");
        self.inner
            .listeners
            .emit(&MonitorEvent::Cleared(job_id.to_string()));
        true
    }

    /// Merge `update` into its job's state.
    ///
    /// Stale and illegal updates are dropped. Terminal transitions produce notifications and
    /// invoke the job's hooks; failures are logged and may schedule an automatic restart.
    pub fn on_status_update(&self, update: StatusUpdate) -> UpdateOutcome {
        let Some(slot) = self.slot(&update.job_id) else {
            tracing::debug!(job_id = %update.job_id, "Update for untracked job");
            return UpdateOutcome::Untracked;
        };

        let (previous, state, hooks, monitored) = {
            let mut guard = lock_slot(&slot);
            if let (Some(sequence), Some(last)) = (update.sequence, guard.last_sequence)
                && sequence <= last
            {
                tracing::debug!(job_id = %update.job_id, sequence, last, "Dropping stale update");
                return UpdateOutcome::Stale;
            }

            let previous = guard.state.status;
            if !previous.can_transition_to(update.status) {
                tracing::warn!(
                    job_id = %update.job_id,
                    from = %previous,
                    to = %update.status,
                    "Rejected status transition"
                );
                return UpdateOutcome::Rejected;
            }

            if update.sequence.is_some() {
                guard.last_sequence = update.sequence;
            }
            merge_update(&mut guard.state, &update);
            (
                previous,
                guard.state.clone(),
                guard.hooks.clone(),
                guard.subscription.is_some(),
            )
        };

        self.inner
            .listeners
            .emit(&MonitorEvent::StatusChanged(state.clone()));

        match state.status {
            ProcessingStage::Completed => {
                tracing::info!(
                    job_id = %state.job_id,
                    retries = state.retry_count,
                    "Processing completed"
                );
                self.notify(
                    &state.job_id,
                    NotificationType::Complete,
                    "Processing complete",
                    format!("{} finished processing", state.job_id),
                    None,
                );
                if let Some(hook) = &hooks.on_complete {
                    hook(&state);
                }
            }
            ProcessingStage::Failed => {
                let record = self.log_failure(previous, &state);
                let will_retry = monitored
                    && self.inner.config.auto_retry
                    && state.retry_count < self.inner.config.max_retries;
                self.notify(
                    &state.job_id,
                    NotificationType::Error,
                    "Processing failed",
                    record.message.clone(),
                    (!will_retry).then(|| format!("retry:{}", state.job_id)),
                );
                if let Some(hook) = &hooks.on_error {
                    hook(&state.job_id, &record);
                }
                if will_retry {
                    self.schedule_retry(&state.job_id, &slot, state.retry_count);
                }
            }
            stage if stage != previous => {
                self.notify(
                    &state.job_id,
                    NotificationType::Progress,
                    "Processing update",
                    format!("{} is now {stage}", state.job_id),
                    None,
                );
            }
            _ => {}
        }

        UpdateOutcome::Applied
    }

    /// Restart `job_id` from `Uploading` and ask the source to reprocess it.
    ///
    /// Returns `false` when the job is not tracked or has not failed. A rejected restart is
    /// applied as a failed update, which may in turn schedule another automatic restart.
    pub async fn retry_processing(&self, job_id: &str) -> bool {
        self.restart(job_id, None).await
    }

    async fn restart(&self, job_id: &str, timer_slot: Option<&SharedSlot>) -> bool {
        let Some(slot) = self.slot(job_id) else {
            return false;
        };

        let state = {
            let mut guard = lock_slot(&slot);
            if let Some(expected) = timer_slot {
                if !Arc::ptr_eq(expected, &slot) {
                    return false;
                }
                guard.retry_timer = None;
                if guard.subscription.is_none() {
                    return false;
                }
            }
            if guard.state.status != ProcessingStage::Failed {
                tracing::debug!(job_id, status = %guard.state.status, "Only failed jobs restart");
                return false;
            }
            if let Some(timer) = guard.retry_timer.take() {
                timer.abort();
            }

            let state = &mut guard.state;
            state.retry_count += 1;
            state.status = ProcessingStage::Uploading;
            state.progress = 0;
            state.message = format!("Retry {} started", state.retry_count);
            state.estimated_time_remaining = None;
            state.error_details = None;
            state.end_time = None;
            guard.last_sequence = None;
            guard.state.clone()
        };

        self.inner.metrics.record_job_restart();
        tracing::info!(job_id, retry_count = state.retry_count, "Restarting processing");
        self.inner.listeners.emit(&MonitorEvent::StatusChanged(state));

        if let Err(error) = self.inner.source.trigger_retry(job_id).await {
            let record = enhance(error, &self.context("retry_processing", job_id));
            tracing::warn!(job_id, error = %record, "Restart request failed");
            self.on_status_update(
                StatusUpdate::new(job_id, ProcessingStage::Failed, 0).with_error(record.message),
            );
        }
        true
    }

    fn schedule_retry(&self, job_id: &str, slot: &SharedSlot, retry_count: u32) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(job_id, "No async runtime; automatic restart skipped");
            return;
        };

        let delay = self.inner.config.restart_delay(retry_count);
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let expected = Arc::downgrade(slot);
        let job = job_id.to_string();
        tracing::info!(job_id, delay_ms = delay.as_millis() as u64, "Automatic restart scheduled");

        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let (Some(inner), Some(expected)) = (weak.upgrade(), expected.upgrade()) else {
                return;
            };
            ProcessingStatusMonitor { inner }
                .restart(&job, Some(&expected))
                .await;
        });

        let mut guard = lock_slot(slot);
        if guard.subscription.is_none() {
            timer.abort();
        } else if let Some(previous) = guard.retry_timer.replace(timer) {
            previous.abort();
        }
    }

    fn handle_stream_error(&self, job_id: &str, record: ErrorRecord) {
        tracing::warn!(job_id, error = %record, "Status stream reported an error");
        let hooks = self.slot(job_id).map(|slot| lock_slot(&slot).hooks.clone());
        self.inner
            .log
            .log_error(record.clone(), self.context("status_stream", job_id), Severity::Medium);
        self.notify(
            job_id,
            NotificationType::Error,
            "Status updates interrupted",
            record.message.clone(),
            None,
        );
        if let Some(hook) = hooks.as_ref().and_then(|hooks| hooks.on_error.as_ref()) {
            hook(job_id, &record);
        }
    }

    fn log_failure(&self, stage: ProcessingStage, state: &ProcessingStatusState) -> ErrorRecord {
        let kind = match stage {
            ProcessingStage::Embedding => ErrorKind::EmbeddingFailed,
            ProcessingStage::Extracting | ProcessingStage::Chunking => ErrorKind::ExtractionFailed,
            _ => ErrorKind::UnknownError,
        };
        let message = state
            .error_details
            .clone()
            .unwrap_or_else(|| format!("{} failed during {stage}", state.job_id));
        let record = ErrorRecord::new(kind, message)
            .with_detail("job_id", state.job_id.clone())
            .with_detail("stage", stage.as_str())
            .with_detail("retry_count", state.retry_count);
        let context = self
            .context("processing", &state.job_id)
            .with_metadata("stage", stage.as_str());
        self.inner.log.log_error(record.clone(), context, Severity::High);
        record
    }

    fn notify(
        &self,
        job_id: &str,
        kind: NotificationType,
        title: &str,
        message: String,
        action_ref: Option<String>,
    ) {
        let preferences = self.preferences();
        if kind == NotificationType::Progress && !preferences.notify_on_progress {
            return;
        }
        let notification = self
            .inner
            .notifications
            .push(job_id, kind, title, message, action_ref);
        if preferences.allows(kind) {
            self.inner
                .listeners
                .emit(&MonitorEvent::Notification(notification));
        }
    }

    fn context(&self, operation: &str, job_id: &str) -> ErrorContext {
        ErrorContext::new(operation)
            .with_component(COMPONENT)
            .with_metadata("job_id", job_id)
    }

    fn slot(&self, job_id: &str) -> Option<SharedSlot> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    fn states(&self) -> Vec<ProcessingStatusState> {
        let slots: Vec<SharedSlot> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut states: Vec<_> = slots
            .iter()
            .map(|slot| lock_slot(slot).state.clone())
            .collect();
        states.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        states
    }

    /// Current state of `job_id`.
    pub fn status(&self, job_id: &str) -> Option<ProcessingStatusState> {
        self.slot(job_id).map(|slot| lock_slot(&slot).state.clone())
    }

    /// Every tracked state, oldest first.
    pub fn statuses(&self) -> Vec<ProcessingStatusState> {
        self.states()
    }

    /// Whether updates for `job_id` are being received.
    pub fn is_monitoring(&self, job_id: &str) -> bool {
        self.slot(job_id)
            .is_some_and(|slot| lock_slot(&slot).subscription.is_some())
    }

    /// Whether an automatic restart is pending for `job_id`.
    pub fn has_pending_retry(&self, job_id: &str) -> bool {
        self.slot(job_id)
            .is_some_and(|slot| lock_slot(&slot).retry_timer.is_some())
    }

    /// Jobs that have not reached a terminal stage.
    pub fn active_processing(&self) -> Vec<ProcessingStatusState> {
        self.filtered(|stage| !stage.is_terminal())
    }

    /// Jobs that completed.
    pub fn completed_processing(&self) -> Vec<ProcessingStatusState> {
        self.filtered(|stage| stage == ProcessingStage::Completed)
    }

    /// Jobs that failed.
    pub fn failed_processing(&self) -> Vec<ProcessingStatusState> {
        self.filtered(|stage| stage == ProcessingStage::Failed)
    }

    fn filtered(&self, keep: impl Fn(ProcessingStage) -> bool) -> Vec<ProcessingStatusState> {
        self.states()
            .into_iter()
            .filter(|state| keep(state.status))
            .collect()
    }

    /// Mean progress across tracked jobs, `0.0` when nothing is tracked.
    pub fn total_progress(&self) -> f64 {
        let states = self.states();
        if states.is_empty() {
            return 0.0;
        }
        let sum: f64 = states.iter().map(|state| f64::from(state.progress)).sum();
        sum / states.len() as f64
    }

    /// Listen for state changes, announced notifications, and cleared jobs.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Recorded notifications, newest first.
    pub fn notifications(&self) -> Vec<ProcessingNotification> {
        self.inner.notifications.list()
    }

    /// Number of unread notifications.
    pub fn unread_count(&self) -> usize {
        self.inner.notifications.unread_count()
    }

    /// Mark one notification read.
    pub fn mark_as_read(&self, notification_id: &str) -> bool {
        self.inner.notifications.mark_as_read(notification_id)
    }

    /// Mark every notification read.
    pub fn mark_all_as_read(&self) -> usize {
        self.inner.notifications.mark_all_as_read()
    }

    /// Drop every notification.
    pub fn clear_notifications(&self) {
        self.inner.notifications.clear();
    }

    /// Active notification preferences.
    pub fn preferences(&self) -> NotificationPreferences {
        self.inner
            .preferences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the active notification preferences.
    pub fn set_preferences(&self, preferences: NotificationPreferences) {
        *self
            .inner
            .preferences
            .write()
            .unwrap_or_else(PoisonError::into_inner) = preferences;
    }

    /// Replace the active preferences with those persisted in `store`.
    pub fn load_preferences(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        let preferences = NotificationPreferences::load(store)?;
        self.set_preferences(preferences);
        Ok(())
    }

    /// Persist the active preferences into `store`.
    pub fn save_preferences(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        self.preferences().save(store)
    }
}

fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, JobSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn merge_update(state: &mut ProcessingStatusState, update: &StatusUpdate) {
    let progress = update.progress.min(100);
    state.status = update.status;
    state.progress = progress;
    state.message = update.message.clone();
    state.error_details = update.error_details.clone();
    state.estimated_time_remaining = update.estimated_time_remaining.or_else(|| {
        let elapsed = (OffsetDateTime::now_utc() - state.start_time).unsigned_abs();
        estimate_remaining(elapsed, progress)
    });
    state.end_time = update
        .status
        .is_terminal()
        .then(OffsetDateTime::now_utc);
}

/// Linear extrapolation of the remaining time from progress so far.
fn estimate_remaining(elapsed: Duration, progress: u8) -> Option<Duration> {
    if progress == 0 || progress >= 100 {
        return None;
    }
    let remaining = f64::from(100 - progress) / f64::from(progress);
    Some(elapsed.mul_f64(remaining))
}

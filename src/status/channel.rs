//! In-memory [`StatusSource`] backed by per-job tokio broadcast channels.

use crate::errors::{ErrorKind, ErrorRecord};
use crate::status::source::{StatusSource, StatusStream};
use crate::status::types::{ProcessingStage, StatusUpdate};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
enum SourceEvent {
    Update(StatusUpdate),
    Error(ErrorRecord),
}

#[derive(Default)]
struct SourceState {
    channels: HashMap<String, broadcast::Sender<SourceEvent>>,
    statuses: HashMap<String, StatusUpdate>,
    retry_requests: HashMap<String, u32>,
}

/// Status source for embedding the monitor in-process and for tests.
///
/// The producer side calls [`publish`](Self::publish) as a job advances; every subscribed
/// stream receives updates in publish order. A subscriber that falls more than the channel
/// capacity behind skips the missed updates with a warning.
pub struct ChannelStatusSource {
    state: Mutex<SourceState>,
    capacity: usize,
    fail_retries: AtomicBool,
}

impl ChannelStatusSource {
    /// Source with the default per-job buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Source buffering up to `capacity` undelivered events per job.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
            capacity: capacity.max(1),
            fail_retries: AtomicBool::new(false),
        }
    }

    /// Record `update` as the job's current status and deliver it to subscribers.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, update: StatusUpdate) -> usize {
        let mut state = self.lock();
        state
            .statuses
            .insert(update.job_id.clone(), update.clone());
        let sender = self.sender(&mut state, &update.job_id);
        sender.send(SourceEvent::Update(update)).unwrap_or(0)
    }

    /// Deliver a delivery failure for `job_id` to subscribers.
    pub fn publish_error(&self, job_id: &str, error: ErrorRecord) -> usize {
        let mut state = self.lock();
        let sender = self.sender(&mut state, job_id);
        sender.send(SourceEvent::Error(error)).unwrap_or(0)
    }

    /// Set the snapshot returned by `current_status` without notifying subscribers.
    pub fn set_status(&self, update: StatusUpdate) {
        self.lock().statuses.insert(update.job_id.clone(), update);
    }

    /// Close the job's channel, ending every open stream once drained.
    pub fn close(&self, job_id: &str) -> bool {
        self.lock().channels.remove(job_id).is_some()
    }

    /// How many times a restart was requested for `job_id`.
    pub fn retry_requests(&self, job_id: &str) -> u32 {
        self.lock()
            .retry_requests
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Make subsequent `trigger_retry` calls fail.
    pub fn fail_retries(&self, fail: bool) {
        self.fail_retries.store(fail, Ordering::SeqCst);
    }

    fn sender(&self, state: &mut SourceState, job_id: &str) -> broadcast::Sender<SourceEvent> {
        state
            .channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChannelStatusSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSource for ChannelStatusSource {
    async fn current_status(&self, job_id: &str) -> anyhow::Result<Option<StatusUpdate>> {
        Ok(self.lock().statuses.get(job_id).cloned())
    }

    fn subscribe(&self, job_id: &str) -> StatusStream {
        // Subscribe before returning so nothing published after this call is missed.
        let mut receiver = {
            let mut state = self.lock();
            self.sender(&mut state, job_id).subscribe()
        };
        let job_id = job_id.to_string();

        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(SourceEvent::Update(update)) => yield Ok(update),
                    Ok(SourceEvent::Error(error)) => yield Err(error),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            job_id = %job_id,
                            skipped,
                            "Status subscriber lagged behind"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }

    async fn trigger_retry(&self, job_id: &str) -> anyhow::Result<()> {
        {
            let mut state = self.lock();
            *state.retry_requests.entry(job_id.to_string()).or_insert(0) += 1;
            if !self.fail_retries.load(Ordering::SeqCst) {
                state.statuses.insert(
                    job_id.to_string(),
                    StatusUpdate::new(job_id, ProcessingStage::Uploading, 0),
                );
            }
        }

        if self.fail_retries.load(Ordering::SeqCst) {
            return Err(ErrorRecord::new(
                ErrorKind::StorageError,
                format!("Processing backend refused to restart {job_id}"),
            )
            .into());
        }
        tracing::debug!(job_id, "Processing restart requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_updates_in_publish_order() {
        let source = ChannelStatusSource::new();
        let mut stream = source.subscribe("doc-1");

        source.publish(StatusUpdate::new("doc-1", ProcessingStage::Uploading, 10));
        source.publish(StatusUpdate::new("doc-1", ProcessingStage::Extracting, 30));
        source.publish_error("doc-1", ErrorRecord::from_kind(ErrorKind::NetworkError));

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        let third = stream.next().await.unwrap().unwrap_err();
        assert_eq!(first.progress, 10);
        assert_eq!(second.status, ProcessingStage::Extracting);
        assert_eq!(third.kind, ErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn publish_updates_the_current_snapshot() {
        let source = ChannelStatusSource::new();
        assert!(source.current_status("doc-1").await.unwrap().is_none());

        source.publish(StatusUpdate::new("doc-1", ProcessingStage::Chunking, 50));
        let current = source.current_status("doc-1").await.unwrap().unwrap();
        assert_eq!(current.status, ProcessingStage::Chunking);
    }

    #[tokio::test]
    async fn close_ends_open_streams() {
        let source = ChannelStatusSource::new();
        let mut stream = source.subscribe("doc-1");
        assert!(source.close("doc-1"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn retry_requests_are_counted_and_can_fail() {
        let source = ChannelStatusSource::new();
        source.trigger_retry("doc-1").await.unwrap();
        source.fail_retries(true);
        let error = source.trigger_retry("doc-1").await.unwrap_err();

        assert_eq!(source.retry_requests("doc-1"), 2);
        assert_eq!(
            error.downcast_ref::<ErrorRecord>().map(|r| r.kind),
            Some(ErrorKind::StorageError)
        );
    }
}

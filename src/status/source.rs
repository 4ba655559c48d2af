//! Boundary contract for the backend that reports job status.

use crate::errors::ErrorRecord;
use crate::status::types::StatusUpdate;
use async_trait::async_trait;
use futures_core::stream::BoxStream;

/// Ordered stream of updates (or delivery failures) for one job.
pub type StatusStream = BoxStream<'static, Result<StatusUpdate, ErrorRecord>>;

/// External status backend.
///
/// Implementations must deliver updates for a single job in the order they were produced.
/// If ordering cannot be guaranteed, updates should carry [`StatusUpdate::sequence`] so the
/// monitor can drop stale ones.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Snapshot of the job's current status, or `None` if the backend has nothing yet.
    async fn current_status(&self, job_id: &str) -> anyhow::Result<Option<StatusUpdate>>;

    /// Subscribe to future updates for `job_id`. Dropping the stream unsubscribes.
    fn subscribe(&self, job_id: &str) -> StatusStream;

    /// Restart processing of `job_id` from the beginning.
    async fn trigger_retry(&self, job_id: &str) -> anyhow::Result<()>;
}

//! Job stages, tracked state, status updates, and notifications.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Stage of a document processing job.
///
/// `Uploading → Extracting → Chunking → Embedding → Completed`, with any non-terminal stage
/// able to drop to `Failed`, and `Failed` able to restart at `Uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    /// File is being transferred.
    Uploading,
    /// Text is being extracted.
    Extracting,
    /// Text is being split into chunks.
    Chunking,
    /// Chunks are being embedded.
    Embedding,
    /// Job finished successfully.
    Completed,
    /// Job stopped with an error.
    Failed,
}

impl ProcessingStage {
    /// Whether the stage ends the job.
    pub const fn is_terminal(self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Failed)
    }

    const fn pipeline_index(self) -> Option<u8> {
        match self {
            ProcessingStage::Uploading => Some(0),
            ProcessingStage::Extracting => Some(1),
            ProcessingStage::Chunking => Some(2),
            ProcessingStage::Embedding => Some(3),
            ProcessingStage::Completed => Some(4),
            ProcessingStage::Failed => None,
        }
    }

    /// Transition validator.
    ///
    /// Allows staying in a non-terminal stage (progress refresh), advancing exactly one
    /// stage, failing from any non-terminal stage, and restarting a failed job. Terminal
    /// stages accept nothing else.
    pub fn can_transition_to(self, next: ProcessingStage) -> bool {
        use ProcessingStage::*;

        match (self, next) {
            (Completed, _) => false,
            (Failed, Uploading) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (current, next) => match (current.pipeline_index(), next.pipeline_index()) {
                (Some(from), Some(to)) => to == from || to == from + 1,
                _ => false,
            },
        }
    }

    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            ProcessingStage::Uploading => "uploading",
            ProcessingStage::Extracting => "extracting",
            ProcessingStage::Chunking => "chunking",
            ProcessingStage::Embedding => "embedding",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatusState {
    /// Job identifier.
    pub job_id: String,
    /// Current stage.
    pub status: ProcessingStage,
    /// Completion percentage, `0..=100`.
    pub progress: u8,
    /// Latest status message.
    pub message: String,
    /// Reported or estimated time to completion.
    pub estimated_time_remaining: Option<Duration>,
    /// Failure description for failed jobs.
    pub error_details: Option<String>,
    /// When tracking began.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// When the job reached a terminal stage.
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Number of restarts after failure.
    pub retry_count: u32,
}

impl ProcessingStatusState {
    /// Fresh state at `Uploading` with zero progress.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ProcessingStage::Uploading,
            progress: 0,
            message: String::new(),
            estimated_time_remaining: None,
            error_details: None,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            retry_count: 0,
        }
    }
}

/// Status change reported by the backend for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Job identifier.
    pub job_id: String,
    /// Monotonic sequence number; stale updates are dropped when present.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// New stage.
    pub status: ProcessingStage,
    /// Completion percentage; values above 100 are clamped.
    pub progress: u8,
    /// Status message.
    #[serde(default)]
    pub message: String,
    /// Backend-provided time to completion.
    #[serde(default)]
    pub estimated_time_remaining: Option<Duration>,
    /// Failure description.
    #[serde(default)]
    pub error_details: Option<String>,
}

impl StatusUpdate {
    /// Update moving `job_id` to `status` at `progress`.
    pub fn new(job_id: impl Into<String>, status: ProcessingStage, progress: u8) -> Self {
        Self {
            job_id: job_id.into(),
            sequence: None,
            status,
            progress,
            message: String::new(),
            estimated_time_remaining: None,
            error_details: None,
        }
    }

    /// Attach a sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Attach a status message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach a backend ETA.
    pub fn with_eta(mut self, eta: Duration) -> Self {
        self.estimated_time_remaining = Some(eta);
        self
    }

    /// Attach failure details.
    pub fn with_error(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// A job completed.
    Complete,
    /// A job failed or status delivery broke.
    Error,
    /// Something degraded but recoverable.
    Warning,
    /// A job advanced to another stage.
    Progress,
}

/// Entry in the notification ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingNotification {
    /// Notification identifier.
    pub id: String,
    /// Job the notification concerns.
    pub job_id: String,
    /// Notification category.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Whether the user has seen it.
    pub read: bool,
    /// Optional reference to an action the presentation layer may offer.
    pub action_ref: Option<String>,
}

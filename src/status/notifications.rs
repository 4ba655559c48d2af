//! Bounded, most-recent-first buffer of processing notifications.

use crate::errors::generate_id;
use crate::status::types::{NotificationType, ProcessingNotification};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

/// Default number of notifications kept.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Ring buffer of notifications, newest first. Entries are never reordered.
pub struct NotificationCenter {
    buffer: Mutex<VecDeque<ProcessingNotification>>,
    capacity: usize,
}

impl NotificationCenter {
    /// Buffer keeping at most `capacity` notifications (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create and store an unread notification, evicting the oldest beyond capacity.
    pub fn push(
        &self,
        job_id: &str,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        action_ref: Option<String>,
    ) -> ProcessingNotification {
        let notification = ProcessingNotification {
            id: generate_id("notif"),
            job_id: job_id.to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
            read: false,
            action_ref,
        };

        let mut buffer = self.lock();
        buffer.push_front(notification.clone());
        buffer.truncate(self.capacity);
        notification
    }

    /// Snapshot, newest first.
    pub fn list(&self) -> Vec<ProcessingNotification> {
        self.lock().iter().cloned().collect()
    }

    /// Number of unread notifications.
    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|n| !n.read).count()
    }

    /// Mark one notification as read. Returns whether it was found.
    pub fn mark_as_read(&self, id: &str) -> bool {
        match self.lock().iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark everything read and return how many changed.
    pub fn mark_all_as_read(&self) -> usize {
        let mut changed = 0;
        for notification in self.lock().iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }
        changed
    }

    /// Drop every notification.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored notifications.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ProcessingNotification>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(center: &NotificationCenter, job: &str) -> ProcessingNotification {
        center.push(job, NotificationType::Complete, "Done", "finished", None)
    }

    #[test]
    fn newest_first_and_bounded() {
        let center = NotificationCenter::new(3);
        for job in ["a", "b", "c", "d"] {
            push(&center, job);
        }

        let jobs: Vec<String> = center.list().into_iter().map(|n| n.job_id).collect();
        assert_eq!(jobs, vec!["d", "c", "b"]);
    }

    #[test]
    fn unread_count_tracks_read_flags() {
        let center = NotificationCenter::default();
        let first = push(&center, "a");
        push(&center, "b");
        assert_eq!(center.unread_count(), 2);

        assert!(center.mark_as_read(&first.id));
        assert!(!center.mark_as_read("missing"));
        assert_eq!(center.unread_count(), 1);

        assert_eq!(center.mark_all_as_read(), 1);
        assert_eq!(center.unread_count(), 0);
        assert_eq!(center.len(), 2);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let center = NotificationCenter::default();
        push(&center, "a");
        center.clear();
        assert!(center.is_empty());
    }
}

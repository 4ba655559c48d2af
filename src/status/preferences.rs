//! Notification preferences persisted through an injected key-value store.

use crate::status::types::NotificationType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Key under which preferences are stored.
pub const PREFERENCES_KEY: &str = "notification_preferences";

/// Errors raised while reading or writing preferences.
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// The backing store failed.
    #[error("Preference store failed: {0}")]
    Store(String),
    /// Stored preferences could not be encoded or decoded.
    #[error("Invalid stored preferences: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value persistence supplied by the host application.
pub trait PreferenceStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: String) -> Result<(), PreferenceError>;
}

/// Process-local [`PreferenceStore`].
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryPreferenceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Delivery channels and per-event toggles for processing notifications.
///
/// The channel flags are opaque to this crate and passed through for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    /// Desktop notifications.
    pub enable_browser_notifications: bool,
    /// In-app toasts.
    pub enable_toast_notifications: bool,
    /// Email delivery.
    pub enable_email_notifications: bool,
    /// Announce completed jobs.
    pub notify_on_complete: bool,
    /// Announce failures.
    pub notify_on_error: bool,
    /// Announce stage changes.
    pub notify_on_progress: bool,
    /// Play a sound on delivery.
    pub sound_enabled: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enable_browser_notifications: true,
            enable_toast_notifications: true,
            enable_email_notifications: false,
            notify_on_complete: true,
            notify_on_error: true,
            notify_on_progress: false,
            sound_enabled: true,
        }
    }
}

impl NotificationPreferences {
    /// Whether notifications of `kind` should be delivered to subscribers.
    pub fn allows(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::Complete => self.notify_on_complete,
            NotificationType::Error | NotificationType::Warning => self.notify_on_error,
            NotificationType::Progress => self.notify_on_progress,
        }
    }

    /// Load from `store`, falling back to defaults when nothing is stored.
    pub fn load(store: &dyn PreferenceStore) -> Result<Self, PreferenceError> {
        match store.get(PREFERENCES_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Self::default()),
        }
    }

    /// Persist to `store`.
    pub fn save(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        store.set(PREFERENCES_KEY, serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_preferences_load_defaults() {
        let store = InMemoryPreferenceStore::new();
        let prefs = NotificationPreferences::load(&store).unwrap();
        assert_eq!(prefs, NotificationPreferences::default());
    }

    #[test]
    fn save_then_load_preserves_changes() {
        let store = InMemoryPreferenceStore::new();
        let prefs = NotificationPreferences {
            notify_on_progress: true,
            sound_enabled: false,
            ..NotificationPreferences::default()
        };
        prefs.save(&store).unwrap();

        let raw = store.get(PREFERENCES_KEY).unwrap().unwrap();
        assert!(raw.contains("\"notifyOnProgress\":true"));
        assert_eq!(NotificationPreferences::load(&store).unwrap(), prefs);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let store = InMemoryPreferenceStore::new();
        store
            .set(PREFERENCES_KEY, r#"{"notifyOnError":false}"#.to_string())
            .unwrap();
        let prefs = NotificationPreferences::load(&store).unwrap();
        assert!(!prefs.notify_on_error);
        assert!(prefs.notify_on_complete);
    }

    #[test]
    fn corrupt_documents_are_reported() {
        let store = InMemoryPreferenceStore::new();
        store.set(PREFERENCES_KEY, "not json".to_string()).unwrap();
        assert!(matches!(
            NotificationPreferences::load(&store),
            Err(PreferenceError::Serialization(_))
        ));
    }

    #[test]
    fn allows_follows_event_toggles() {
        let prefs = NotificationPreferences::default();
        assert!(prefs.allows(NotificationType::Complete));
        assert!(prefs.allows(NotificationType::Error));
        assert!(!prefs.allows(NotificationType::Progress));
    }
}

mod channel;
mod monitor;
mod notifications;
mod preferences;
mod source;
mod types;

pub use channel::ChannelStatusSource;
pub use monitor::{
    MonitorConfig, MonitorEvent, MonitorHooks, ProcessingStatusMonitor, UpdateOutcome,
};
pub use notifications::{DEFAULT_NOTIFICATION_CAPACITY, NotificationCenter};
pub use preferences::{
    InMemoryPreferenceStore, NotificationPreferences, PREFERENCES_KEY, PreferenceError,
    PreferenceStore,
};
pub use source::{StatusSource, StatusStream};
pub use types::{
    NotificationType, ProcessingNotification, ProcessingStage, ProcessingStatusState,
    StatusUpdate,
};

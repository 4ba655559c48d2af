//! Normalized failure records and the context attached when logging them.

use crate::errors::kind::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Typed failure surfaced by every executor in this crate.
///
/// Consumers branch on `kind`; `details` is free-form diagnostic payload and never drives
/// control flow.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Opaque unique identifier (`err_<unix-millis>_<random>`).
    pub id: String,
    /// Stable failure code.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Structured diagnostic payload.
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Whether another attempt could succeed.
    pub retryable: bool,
    /// What the user can do about it.
    pub suggested_action: Option<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ErrorRecord {
    /// Build a record using the kind's default `retryable` flag and suggested action.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: generate_id("err"),
            kind,
            message: if message.trim().is_empty() {
                kind.default_message().to_string()
            } else {
                message
            },
            details: Map::new(),
            retryable: kind.default_retryable(),
            suggested_action: Some(kind.suggested_action().to_string()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Build a record carrying the kind's default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// Override the `retryable` flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Override the suggested action.
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    /// Attach a diagnostic detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Where and for whom a failure happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Logical operation name (`document-search`, `upload`, ...).
    pub operation: String,
    /// Component that observed the failure.
    pub component: Option<String>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Session identifier, when known.
    pub session_id: Option<String>,
    /// Arbitrary tags (attempt numbers, provider names, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the context was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ErrorContext {
    /// Context for the named operation, timestamped now.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: None,
            user_id: None,
            session_id: None,
            metadata: Map::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Set the observing component.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Set the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session identifier.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add a metadata tag, replacing any previous value under `key`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Generate an identifier of the form `<prefix>_<unix-millis>_<8 hex chars>`.
pub fn generate_id(prefix: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{millis}_{}", &random[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_kind_defaults() {
        let record = ErrorRecord::new(ErrorKind::NetworkError, "connection reset");
        assert_eq!(record.kind, ErrorKind::NetworkError);
        assert_eq!(record.message, "connection reset");
        assert!(record.retryable);
        assert_eq!(
            record.suggested_action.as_deref(),
            Some(ErrorKind::NetworkError.suggested_action())
        );
        assert!(record.id.starts_with("err_"));
    }

    #[test]
    fn blank_message_falls_back_to_default() {
        let record = ErrorRecord::new(ErrorKind::QueryTooShort, "  ");
        assert_eq!(record.message, ErrorKind::QueryTooShort.default_message());
    }

    #[test]
    fn overrides_are_applied() {
        let record = ErrorRecord::from_kind(ErrorKind::UnknownError)
            .with_retryable(true)
            .with_suggested_action("Reload the page.")
            .with_detail("status", 418);
        assert!(record.retryable);
        assert_eq!(record.suggested_action.as_deref(), Some("Reload the page."));
        assert_eq!(record.details.get("status"), Some(&Value::from(418)));
    }

    #[test]
    fn display_includes_code_and_message() {
        let record = ErrorRecord::new(ErrorKind::StorageError, "disk full");
        assert_eq!(record.to_string(), "STORAGE_ERROR: disk full");
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = generate_id("err");
        let second = generate_id("err");
        assert_ne!(first, second);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let record = ErrorRecord::new(ErrorKind::FileTooLarge, "too big");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "FILE_TOO_LARGE");
        assert_eq!(value["retryable"], false);
        assert!(value.get("suggestedAction").is_some());
        assert!(value.get("createdAt").is_some());
    }
}

//! Error taxonomy, classification, and the in-memory error log.

pub mod classify;
pub mod kind;
pub mod log;
pub mod record;

pub use classify::enhance;
pub use kind::{ErrorCategory, ErrorKind, Severity, UnknownErrorKind};
pub use log::{ErrorLog, ErrorLogEntry, ErrorStatistics};
pub use record::{ErrorContext, ErrorRecord, generate_id};

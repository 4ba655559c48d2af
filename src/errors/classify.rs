//! Best-effort mapping from arbitrary failures to [`ErrorRecord`]s.
//!
//! Records pass through untouched. Everything else is matched against the cause chain:
//! transport failures become `NETWORK_ERROR`, cancellations and timeouts become
//! `PROCESSING_TIMEOUT`, and anything unrecognized becomes a non-retryable `UNKNOWN_ERROR` so
//! an unclassified failure can never drive an endless retry loop.

use crate::errors::kind::ErrorKind;
use crate::errors::record::{ErrorContext, ErrorRecord};
use std::io::ErrorKind as IoErrorKind;

/// Normalize `error` into an [`ErrorRecord`].
pub fn enhance<E>(error: E, context: &ErrorContext) -> ErrorRecord
where
    E: Into<anyhow::Error>,
{
    let error: anyhow::Error = error.into();
    let error = match error.downcast::<ErrorRecord>() {
        Ok(record) => return record,
        Err(error) => error,
    };

    let kind = classify_chain(&error).unwrap_or(ErrorKind::UnknownError);
    let retryable = kind != ErrorKind::UnknownError && kind.default_retryable();

    tracing::debug!(
        operation = %context.operation,
        kind = %kind,
        error = %error,
        "Classified failure"
    );

    ErrorRecord::new(kind, error.to_string())
        .with_retryable(retryable)
        .with_detail("original_error", format!("{error:#}"))
        .with_detail("operation", context.operation.clone())
}

fn classify_chain(error: &anyhow::Error) -> Option<ErrorKind> {
    error.chain().find_map(|cause| {
        if let Some(record) = cause.downcast_ref::<ErrorRecord>() {
            return Some(record.kind);
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return classify_io(io.kind());
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return classify_http(http);
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return Some(ErrorKind::ProcessingTimeout);
        }
        if let Some(join) = cause.downcast_ref::<tokio::task::JoinError>() {
            return join.is_cancelled().then_some(ErrorKind::ProcessingTimeout);
        }
        None
    })
}

fn classify_io(kind: IoErrorKind) -> Option<ErrorKind> {
    match kind {
        IoErrorKind::ConnectionRefused
        | IoErrorKind::ConnectionReset
        | IoErrorKind::ConnectionAborted
        | IoErrorKind::NotConnected
        | IoErrorKind::AddrNotAvailable
        | IoErrorKind::BrokenPipe
        | IoErrorKind::UnexpectedEof => Some(ErrorKind::NetworkError),
        IoErrorKind::TimedOut => Some(ErrorKind::ProcessingTimeout),
        _ => None,
    }
}

fn classify_http(error: &reqwest::Error) -> Option<ErrorKind> {
    if error.is_timeout() {
        return Some(ErrorKind::ProcessingTimeout);
    }
    if let Some(status) = error.status() {
        return match status.as_u16() {
            401 | 403 => Some(ErrorKind::PermissionDenied),
            404 => Some(ErrorKind::DocumentNotFound),
            413 => Some(ErrorKind::FileTooLarge),
            503 => Some(ErrorKind::SearchServiceUnavailable),
            500..=599 => Some(ErrorKind::NetworkError),
            _ => None,
        };
    }
    if error.is_connect() || error.is_request() || error.is_body() {
        return Some(ErrorKind::NetworkError);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::time::Duration;

    fn context() -> ErrorContext {
        ErrorContext::new("unit-test")
    }

    #[test]
    fn records_pass_through_unchanged() {
        let record = ErrorRecord::new(ErrorKind::QueryTooShort, "need more words");
        let id = record.id.clone();
        let enhanced = enhance(record, &context());
        assert_eq!(enhanced.id, id);
        assert_eq!(enhanced.kind, ErrorKind::QueryTooShort);
        assert!(enhanced.details.is_empty());
    }

    #[test]
    fn connection_failures_are_retryable_network_errors() {
        let error = std::io::Error::new(IoErrorKind::ConnectionRefused, "refused");
        let record = enhance(error, &context());
        assert_eq!(record.kind, ErrorKind::NetworkError);
        assert!(record.retryable);
        assert_eq!(record.details["operation"], "unit-test");
    }

    #[test]
    fn wrapped_causes_are_found_in_the_chain() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(IoErrorKind::TimedOut, "slow"));
        let error = result.context("fetching document").unwrap_err();
        let record = enhance(error, &context());
        assert_eq!(record.kind, ErrorKind::ProcessingTimeout);
        assert!(record.retryable);
    }

    #[tokio::test]
    async fn elapsed_timeouts_map_to_processing_timeout() {
        let elapsed = tokio::time::timeout(Duration::ZERO, std::future::pending::<()>())
            .await
            .unwrap_err();
        let record = enhance(elapsed, &context());
        assert_eq!(record.kind, ErrorKind::ProcessingTimeout);
    }

    #[test]
    fn unrecognized_failures_are_not_retryable() {
        let record = enhance(anyhow::anyhow!("something odd"), &context());
        assert_eq!(record.kind, ErrorKind::UnknownError);
        assert!(!record.retryable);
        assert_eq!(record.message, "something odd");
    }
}

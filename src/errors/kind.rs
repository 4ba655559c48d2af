//! Stable error codes and the fixed tables attached to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure cause surfaced to callers and presentation layers.
///
/// Serialized and displayed as the stable SCREAMING_SNAKE_CASE code (`NETWORK_ERROR`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Connection or transport failure while reaching a remote service.
    NetworkError,
    /// Operation was cancelled or exceeded its time budget.
    ProcessingTimeout,
    /// Document storage rejected or failed a read/write.
    StorageError,
    /// Text extraction from an uploaded document failed.
    ExtractionFailed,
    /// Embedding generation failed.
    EmbeddingFailed,
    /// Uploaded file type is not supported.
    InvalidFileFormat,
    /// Uploaded file exceeds the size limit.
    FileTooLarge,
    /// Caller lacks permission for the requested action.
    PermissionDenied,
    /// Referenced document does not exist.
    DocumentNotFound,
    /// Search backend is unreachable or overloaded.
    SearchServiceUnavailable,
    /// Search query is below the minimum length.
    QueryTooShort,
    /// Caller has no documents they may search.
    NoAccessibleDocuments,
    /// Failure that matched no known pattern.
    UnknownError,
}

impl ErrorKind {
    /// Every kind in declaration order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::NetworkError,
        ErrorKind::ProcessingTimeout,
        ErrorKind::StorageError,
        ErrorKind::ExtractionFailed,
        ErrorKind::EmbeddingFailed,
        ErrorKind::InvalidFileFormat,
        ErrorKind::FileTooLarge,
        ErrorKind::PermissionDenied,
        ErrorKind::DocumentNotFound,
        ErrorKind::SearchServiceUnavailable,
        ErrorKind::QueryTooShort,
        ErrorKind::NoAccessibleDocuments,
        ErrorKind::UnknownError,
    ];

    /// Stable string code for this kind.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ProcessingTimeout => "PROCESSING_TIMEOUT",
            ErrorKind::StorageError => "STORAGE_ERROR",
            ErrorKind::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorKind::EmbeddingFailed => "EMBEDDING_FAILED",
            ErrorKind::InvalidFileFormat => "INVALID_FILE_FORMAT",
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorKind::SearchServiceUnavailable => "SEARCH_SERVICE_UNAVAILABLE",
            ErrorKind::QueryTooShort => "QUERY_TOO_SHORT",
            ErrorKind::NoAccessibleDocuments => "NO_ACCESSIBLE_DOCUMENTS",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether failures of this kind are worth retrying unless a call site says otherwise.
    pub const fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::ProcessingTimeout
                | ErrorKind::StorageError
                | ErrorKind::ExtractionFailed
                | ErrorKind::EmbeddingFailed
                | ErrorKind::SearchServiceUnavailable
        )
    }

    /// Functional area used when logging failures of this kind.
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::NetworkError | ErrorKind::SearchServiceUnavailable => {
                ErrorCategory::Network
            }
            ErrorKind::InvalidFileFormat | ErrorKind::FileTooLarge | ErrorKind::QueryTooShort => {
                ErrorCategory::Validation
            }
            ErrorKind::PermissionDenied | ErrorKind::NoAccessibleDocuments => {
                ErrorCategory::Authorization
            }
            ErrorKind::ProcessingTimeout
            | ErrorKind::ExtractionFailed
            | ErrorKind::EmbeddingFailed => ErrorCategory::Processing,
            ErrorKind::StorageError | ErrorKind::DocumentNotFound => ErrorCategory::Storage,
            ErrorKind::UnknownError => ErrorCategory::System,
        }
    }

    /// Generic user-facing message for this kind.
    pub const fn default_message(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "Network connection failed",
            ErrorKind::ProcessingTimeout => "Processing took too long",
            ErrorKind::StorageError => "Storage operation failed",
            ErrorKind::ExtractionFailed => "Could not extract text from the document",
            ErrorKind::EmbeddingFailed => "Failed to generate embeddings",
            ErrorKind::InvalidFileFormat => "Unsupported file format",
            ErrorKind::FileTooLarge => "File exceeds the maximum allowed size",
            ErrorKind::PermissionDenied => "You do not have permission to perform this action",
            ErrorKind::DocumentNotFound => "Document not found",
            ErrorKind::SearchServiceUnavailable => "Search service is temporarily unavailable",
            ErrorKind::QueryTooShort => "Search query is too short",
            ErrorKind::NoAccessibleDocuments => "No documents available to search",
            ErrorKind::UnknownError => "An unexpected error occurred",
        }
    }

    /// What the user can do about a failure of this kind.
    pub const fn suggested_action(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "Check your internet connection and try again.",
            ErrorKind::ProcessingTimeout => {
                "Try again; large documents may need more time to process."
            }
            ErrorKind::StorageError => "Wait a moment and try again.",
            ErrorKind::ExtractionFailed => {
                "Make sure the file is not corrupted or password-protected, then retry."
            }
            ErrorKind::EmbeddingFailed => {
                "Retry processing; the embedding service may be temporarily overloaded."
            }
            ErrorKind::InvalidFileFormat => "Upload a PDF, DOCX, TXT, or Markdown file.",
            ErrorKind::FileTooLarge => "Split the document or compress it before uploading.",
            ErrorKind::PermissionDenied => "Ask the document owner to grant you access.",
            ErrorKind::DocumentNotFound => {
                "Refresh the document list; the document may have been deleted."
            }
            ErrorKind::SearchServiceUnavailable => {
                "Try again shortly; cached results may be shown meanwhile."
            }
            ErrorKind::QueryTooShort => "Enter at least a few words to search.",
            ErrorKind::NoAccessibleDocuments => {
                "Upload a document or request access to existing ones."
            }
            ErrorKind::UnknownError => "Try again; contact support if the problem persists.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raised when parsing a string that is not a known error code.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

/// Urgency of a logged failure, independent of its category.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Expected and handled locally (e.g. a retried attempt).
    Low,
    /// Worth attention but not blocking.
    #[default]
    Medium,
    /// Surfaced to the caller.
    High,
    /// Retries exhausted or data at risk.
    Critical,
}

/// Functional area a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transport and remote service reachability.
    Network,
    /// Rejected input.
    Validation,
    /// Authentication failures.
    Auth,
    /// Access control failures.
    Authorization,
    /// Document processing pipeline failures.
    Processing,
    /// Persistence failures.
    Storage,
    /// Everything else.
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_str() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.code().parse::<ErrorKind>(), Ok(kind));
        }
        assert_eq!(
            "bogus".parse::<ErrorKind>(),
            Err(UnknownErrorKind("bogus".into()))
        );
    }

    #[test]
    fn unspecified_severity_is_medium() {
        assert_eq!(Severity::default(), Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn serde_uses_stable_codes() {
        let encoded = serde_json::to_string(&ErrorKind::SearchServiceUnavailable).unwrap();
        assert_eq!(encoded, "\"SEARCH_SERVICE_UNAVAILABLE\"");
    }

    #[test]
    fn category_table_matches_taxonomy() {
        assert_eq!(ErrorKind::NetworkError.category(), ErrorCategory::Network);
        assert_eq!(ErrorKind::FileTooLarge.category(), ErrorCategory::Validation);
        assert_eq!(
            ErrorKind::PermissionDenied.category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            ErrorKind::EmbeddingFailed.category(),
            ErrorCategory::Processing
        );
        assert_eq!(ErrorKind::StorageError.category(), ErrorCategory::Storage);
        assert_eq!(ErrorKind::UnknownError.category(), ErrorCategory::System);
    }

    #[test]
    fn unknown_errors_are_not_retryable() {
        assert!(!ErrorKind::UnknownError.default_retryable());
        assert!(ErrorKind::NetworkError.default_retryable());
        assert!(!ErrorKind::QueryTooShort.default_retryable());
    }
}

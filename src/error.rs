/*!
 * Error types for Orbit transfers
 */

use orbit_storage_interface::StorageError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Error, Debug)]
pub enum TransferError {
    /// A request field is missing or invalid; raised before any network call
    #[error("Invalid request: {field}: {message}")]
    InvalidRequest {
        field: &'static str,
        message: String,
    },

    /// Local source file or directory does not exist
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reported by the object storage client
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Completion attempted without a result for every planned part
    #[error("Multipart upload {upload_id} has {actual} of {expected} part results")]
    IncompleteUpload {
        upload_id: String,
        expected: usize,
        actual: usize,
    },

    /// The caller cancelled the transfer
    #[error("Transfer cancelled")]
    Cancelled,

    /// A spawned transfer task panicked
    #[error("Transfer task failed: {0}")]
    Task(String),

    /// Error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Build a validation error for a request field
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        TransferError::InvalidRequest {
            field,
            message: message.into(),
        }
    }

    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        TransferError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is the caller's cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            TransferError::Cancelled => true,
            TransferError::Storage(StorageError::Cancelled) => true,
            TransferError::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether a resumable download should retry after this error
    ///
    /// Local I/O during the body write and the transient transport kinds
    /// (connection reset, keep-alive failure, name resolution failure,
    /// receive failure) are retryable. Service errors never are: the
    /// storage client has already applied its own retry policy to them.
    pub fn is_retryable_download(&self) -> bool {
        match self {
            TransferError::Io(_) => true,
            TransferError::Storage(err) => err.is_transient(),
            TransferError::WithContext { source, .. } => source.is_retryable_download(),
            _ => false,
        }
    }

    /// Strip one level of context when the wrapped error is the informative cause
    pub fn into_root_cause(self) -> Self {
        match self {
            TransferError::WithContext { source, .. } => *source,
            other => other,
        }
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::InvalidRequest { .. } | TransferError::SourceNotFound(_) => {
                ErrorCategory::Validation
            }
            TransferError::Config(_) => ErrorCategory::Configuration,
            TransferError::Storage(StorageError::Service { .. }) => ErrorCategory::Service,
            TransferError::Storage(StorageError::Cancelled) | TransferError::Cancelled => {
                ErrorCategory::Cancelled
            }
            TransferError::Storage(StorageError::Io(_)) | TransferError::Io(_) => {
                ErrorCategory::IoError
            }
            TransferError::Storage(_) => ErrorCategory::Network,
            TransferError::IncompleteUpload { .. } => ErrorCategory::Integrity,
            TransferError::Task(_) => ErrorCategory::Concurrency,
            TransferError::WithContext { source, .. } => source.category(),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Configuration => EXIT_FATAL,
            ErrorCategory::Integrity => EXIT_INTEGRITY,
            ErrorCategory::Cancelled => EXIT_CANCELLED,
            _ => EXIT_PARTIAL,
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TransferError::Cancelled
        } else {
            TransferError::Task(err.to_string())
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request validation errors
    Validation,
    /// Configuration errors
    Configuration,
    /// Storage service rejected the request
    Service,
    /// Transport failures talking to the service
    Network,
    /// Local I/O errors
    IoError,
    /// Multipart bookkeeping errors
    Integrity,
    /// Task scheduling errors
    Concurrency,
    /// Caller cancellation
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Service => write!(f, "service"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_storage_interface::TransportErrorKind;

    #[test]
    fn test_retryable_download_errors() {
        assert!(TransferError::Io(io::Error::other("disk hiccup")).is_retryable_download());
        assert!(TransferError::Storage(StorageError::transport(
            TransportErrorKind::ConnectionReset,
            "reset by peer"
        ))
        .is_retryable_download());
        assert!(TransferError::Storage(StorageError::transport(
            TransportErrorKind::KeepAliveFailure,
            "stale connection"
        ))
        .is_retryable_download());
    }

    #[test]
    fn test_fatal_download_errors() {
        assert!(!TransferError::Storage(StorageError::service(404, "NoSuchKey", "gone"))
            .is_retryable_download());
        assert!(!TransferError::invalid("bucket", "is required").is_retryable_download());
        assert!(!TransferError::Cancelled.is_retryable_download());
    }

    #[test]
    fn test_context_unwrap() {
        let wrapped = TransferError::Io(io::Error::other("boom")).context("writing part 3");
        assert!(wrapped.is_retryable_download());
        assert_eq!(wrapped.to_string(), "writing part 3: I/O error: boom");

        let root = wrapped.into_root_cause();
        assert!(matches!(root, TransferError::Io(_)));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(TransferError::Cancelled.is_cancelled());
        assert!(TransferError::Storage(StorageError::Cancelled).is_cancelled());
        assert!(TransferError::Cancelled.context("upload").is_cancelled());
        assert!(!TransferError::Task("panic".to_string()).is_cancelled());
    }

    #[test]
    fn test_categories_and_exit_codes() {
        let err = TransferError::invalid("key", "is required");
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.exit_code(), EXIT_FATAL);

        let err = TransferError::IncompleteUpload {
            upload_id: "u1".to_string(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.category(), ErrorCategory::Integrity);
        assert_eq!(err.exit_code(), EXIT_INTEGRITY);

        let err = TransferError::Storage(StorageError::service(500, "InternalError", "oops"));
        assert_eq!(err.category(), ErrorCategory::Service);
        assert_eq!(err.exit_code(), EXIT_PARTIAL);

        assert_eq!(TransferError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_error_display() {
        let err = TransferError::invalid("bucket", "must be set");
        assert_eq!(err.to_string(), "Invalid request: bucket: must be set");

        let err = TransferError::SourceNotFound(PathBuf::from("/tmp/missing.bin"));
        assert_eq!(err.to_string(), "Source not found: /tmp/missing.bin");

        assert_eq!(ErrorCategory::Network.to_string(), "network");
    }
}

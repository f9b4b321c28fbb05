//! Error taxonomy surfaced by object storage clients

use std::io;
use thiserror::Error;

/// Result type alias for storage client calls
pub type Result<T> = std::result::Result<T, StorageError>;

/// Classification of client/transport failures
///
/// Clients map their native transport errors onto these kinds so the
/// transfer engine can decide what is worth retrying without knowing the
/// HTTP stack underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Peer reset or closed the connection mid-request
    ConnectionReset,
    /// A pooled keep-alive connection was found dead
    KeepAliveFailure,
    /// The endpoint host name could not be resolved
    NameResolutionFailure,
    /// The response body could not be received completely
    ReceiveFailure,
    /// The request timed out
    Timeout,
    /// Anything else the transport reported
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::KeepAliveFailure => "keep-alive failure",
            TransportErrorKind::NameResolutionFailure => "name resolution failure",
            TransportErrorKind::ReceiveFailure => "receive failure",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

/// Errors returned by an [`ObjectStorageClient`](crate::ObjectStorageClient)
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage service answered with an error status
    #[error("storage service error ({status} {code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a service answer
    #[error("{kind}: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Local I/O failed while producing or consuming a body
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The call was abandoned because the caller cancelled it
    #[error("request cancelled")]
    Cancelled,

    /// Anything the client could not classify
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Build a service error
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Service {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a transport error
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        StorageError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// The service error code, if this is a service error
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The endpoint does not implement the requested operation
    ///
    /// Used to fall back from `ListObjectsV2` to the legacy listing on
    /// S3-compatible endpoints that only speak the old API.
    pub fn is_not_implemented(&self) -> bool {
        matches!(
            self,
            StorageError::Service { status: 501, .. }
        ) || self.code() == Some("NotImplemented")
    }

    /// Transport failures and local I/O failures that usually go away on retry
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transport { kind, .. } => matches!(
                kind,
                TransportErrorKind::ConnectionReset
                    | TransportErrorKind::KeepAliveFailure
                    | TransportErrorKind::NameResolutionFailure
                    | TransportErrorKind::ReceiveFailure
            ),
            StorageError::Io(_) => true,
            _ => false,
        }
    }
}

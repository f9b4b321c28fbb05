//! Mapping of AWS SDK failures onto the storage error taxonomy

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use orbit_storage_interface::{StorageError, TransportErrorKind};

/// Convert an SDK error into a [`StorageError`]
///
/// Service answers keep their status and error code; everything that never
/// produced an answer becomes a transport error whose kind decides whether
/// the transfer engine retries it.
pub(crate) fn map_sdk_error<E>(error: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or("Unknown").to_string();
            let detail = service
                .err()
                .message()
                .map(str::to_string)
                .unwrap_or(message);
            StorageError::service(status, code, detail)
        }
        SdkError::TimeoutError(_) => StorageError::transport(TransportErrorKind::Timeout, message),
        SdkError::DispatchFailure(failure) => {
            let kind = if failure.is_timeout() {
                TransportErrorKind::Timeout
            } else if failure.is_io() {
                classify_io_message(&message)
            } else {
                TransportErrorKind::Other
            };
            StorageError::transport(kind, message)
        }
        SdkError::ResponseError(_) => {
            StorageError::transport(TransportErrorKind::ReceiveFailure, message)
        }
        _ => StorageError::Other(message),
    }
}

/// Pick a transport kind from the connector's description of an I/O failure
pub(crate) fn classify_io_message(message: &str) -> TransportErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
        TransportErrorKind::NameResolutionFailure
    } else if lower.contains("keep-alive") || lower.contains("keepalive") {
        TransportErrorKind::KeepAliveFailure
    } else if lower.contains("connection reset")
        || lower.contains("connection closed")
        || lower.contains("broken pipe")
    {
        TransportErrorKind::ConnectionReset
    } else {
        TransportErrorKind::ReceiveFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_message_classification() {
        assert_eq!(
            classify_io_message("dns error: failed to lookup address"),
            TransportErrorKind::NameResolutionFailure
        );
        assert_eq!(
            classify_io_message("Connection reset by peer (os error 104)"),
            TransportErrorKind::ConnectionReset
        );
        assert_eq!(
            classify_io_message("keep-alive connection was closed"),
            TransportErrorKind::KeepAliveFailure
        );
        assert_eq!(
            classify_io_message("unexpected end of file"),
            TransportErrorKind::ReceiveFailure
        );
    }

    #[test]
    fn test_classified_kinds_are_retried() {
        for message in ["dns error", "connection reset", "keepalive", "eof"] {
            let err = StorageError::transport(classify_io_message(message), message);
            assert!(err.is_transient(), "{} should be transient", message);
        }
    }
}

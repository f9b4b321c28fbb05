/*!
 * Retry backoff and classification for resumable downloads
 */

use std::time::Duration;

use crate::error::TransferError;

/// Delay before the first retry
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on any single retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff: `min(4^retries * 100ms, 30s)`
pub fn backoff_delay(retries: u32) -> Duration {
    let factor = 4u64.checked_pow(retries).unwrap_or(u64::MAX);
    let millis = (BASE_RETRY_DELAY.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(MAX_RETRY_DELAY)
}

/// Retry budget for one download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether `err` may be retried after `retries` earlier retries
    pub fn should_retry(&self, err: &TransferError, retries: u32) -> bool {
        retries < self.max_retries && err.is_retryable_download()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_storage_interface::{StorageError, TransportErrorKind};

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_millis(100));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(2), Duration::from_millis(1600));
        assert_eq!(backoff_delay(3), Duration::from_millis(6400));
        assert_eq!(backoff_delay(4), Duration::from_millis(25600));
        assert_eq!(backoff_delay(5), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_backoff_never_overflows() {
        assert_eq!(backoff_delay(40), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_policy_respects_budget() {
        let policy = RetryPolicy::new(2);
        let transient = TransferError::Storage(StorageError::transport(
            TransportErrorKind::ReceiveFailure,
            "body cut short",
        ));

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 1));
        assert!(!policy.should_retry(&transient, 2));
    }

    #[test]
    fn test_policy_rejects_fatal_errors() {
        let policy = RetryPolicy::new(10);
        let denied = TransferError::Storage(StorageError::service(403, "AccessDenied", "no"));
        assert!(!policy.should_retry(&denied, 0));
        assert!(!policy.should_retry(&TransferError::Cancelled, 0));
    }
}

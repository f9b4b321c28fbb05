/*!
 * Orbit Transfer - object storage transfer engine
 *
 * Moves files, streams and directory trees to and from an object storage
 * service through an [`ObjectStorageClient`]:
 * - Multipart uploads with planned part sizes and bounded part concurrency
 * - Streaming uploads of unknown length
 * - Resumable downloads with byte-range resume and object-change detection
 * - Directory uploads and downloads with two-level admission control
 * - Sweeps of stale multipart uploads
 * - Interval-spaced progress events with retry compensation
 *
 * Start with [`TransferManager`].
 */

pub mod cli_progress;
mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod manager;
pub mod request;
pub mod testing;

#[cfg(feature = "s3-native")]
pub mod protocol;

// Re-export commonly used types
pub use config::{LogConfig, LogLevel, TransferConfig, TransferConfigBuilder};
pub use core::{
    CurrentFile, DirectoryProgress, ProgressEvent, ProgressReporter, TransferProgress, MAX_PARTS,
    MIN_PART_SIZE,
};
pub use error::{ErrorCategory, Result, TransferError};
pub use manager::TransferManager;
pub use orbit_storage_interface::{
    ChecksumAlgorithm, CustomerKey, ObjectLock, ObjectOptions, ObjectStorageClient,
    ServerSideEncryption, StorageError, Tag,
};
pub use request::{
    AbortSweepOutcome, BoxedSeekableReader, DirectoryOutcome, DownloadDirectoryRequest,
    DownloadOutcome, DownloadRequest, OpenStreamRequest, SeekableReader, SharedSeekableReader,
    UploadDirectoryRequest, UploadInterceptor, UploadOutcome, UploadRequest, UploadSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bound on concurrent service requests per transfer
pub const DEFAULT_CONCURRENT_SERVICE_REQUESTS: usize = 10;

/// Default content length at which uploads switch to multipart (16 MiB)
pub const DEFAULT_MIN_SIZE_BEFORE_PART_UPLOAD: u64 = 16 * 1024 * 1024;

/// Default wait for in-flight parts before a failed upload is aborted
pub const DEFAULT_MULTIPART_FINALIZE_TIMEOUT_MS: u64 = 5000;

/// Default bytes between progress events (100 KiB)
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100 * 1024;

/// Default read chunk for forward-only streams (8 KiB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_threshold_exceeds_minimum_part() {
        assert!(DEFAULT_MIN_SIZE_BEFORE_PART_UPLOAD >= MIN_PART_SIZE);
    }
}

/*!
 * Transfer requests and outcomes
 *
 * Requests are owned by the caller and handed to the
 * [`TransferManager`](crate::TransferManager) by value. Validation runs
 * before any service call, so a malformed request never reaches the
 * network.
 */

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use orbit_storage_interface::{
    BoxedReader, CustomerKey, MultipartUploadSummary, ObjectOptions,
};
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::Mutex;

use crate::core::ProgressReporter;
use crate::error::{Result, TransferError};

/// A reader that can also seek
pub trait SeekableReader: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> SeekableReader for T {}

pub type BoxedSeekableReader = Box<dyn SeekableReader>;

/// A seekable stream the caller can keep a handle to
///
/// Whether the upload succeeds or fails, the stream is left at the
/// position reading started from, ready to be uploaded again.
pub type SharedSeekableReader = Arc<Mutex<BoxedSeekableReader>>;

/// Where upload bytes come from
pub enum UploadSource {
    /// A local file; multipart parts read it through independent handles
    File(PathBuf),
    /// A caller stream that can seek
    ///
    /// Reading starts at the stream's current position. Without an explicit
    /// length, the remaining length is measured by seeking to the end.
    SeekableStream {
        reader: SharedSeekableReader,
        content_length: Option<u64>,
    },
    /// A forward-only stream, length optional
    Stream {
        reader: BoxedReader,
        content_length: Option<u64>,
    },
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadSource::SeekableStream { content_length, .. } => f
                .debug_struct("SeekableStream")
                .field("content_length", content_length)
                .finish_non_exhaustive(),
            UploadSource::Stream { content_length, .. } => f
                .debug_struct("Stream")
                .field("content_length", content_length)
                .finish_non_exhaustive(),
        }
    }
}

/// Upload of one object
#[derive(Debug)]
pub struct UploadRequest {
    pub bucket: String,
    /// Derived from the file name when absent and the source is a file
    pub key: Option<String>,
    pub source: UploadSource,
    pub options: ObjectOptions,
    /// Overrides the planned part size (raised to the service minimum)
    pub part_size: Option<u64>,
    /// Overrides the configured concurrency for this transfer
    pub concurrency: Option<usize>,
    pub progress: Option<ProgressReporter>,
}

impl UploadRequest {
    /// Upload a local file
    pub fn from_file(bucket: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(bucket, UploadSource::File(path.into()))
    }

    /// Upload a forward-only stream
    pub fn from_stream<R>(
        bucket: impl Into<String>,
        key: impl Into<String>,
        reader: R,
        content_length: Option<u64>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::new(
            bucket,
            UploadSource::Stream {
                reader: Box::new(reader),
                content_length,
            },
        )
        .with_key(key)
    }

    /// Upload a seekable stream
    pub fn from_seekable<R>(
        bucket: impl Into<String>,
        key: impl Into<String>,
        reader: R,
        content_length: Option<u64>,
    ) -> Self
    where
        R: SeekableReader + 'static,
    {
        let reader: BoxedSeekableReader = Box::new(reader);
        Self::from_shared_seekable(bucket, key, Arc::new(Mutex::new(reader)), content_length)
    }

    /// Upload a seekable stream the caller keeps a handle to
    ///
    /// The handle is locked while bytes are read from it.
    pub fn from_shared_seekable(
        bucket: impl Into<String>,
        key: impl Into<String>,
        reader: SharedSeekableReader,
        content_length: Option<u64>,
    ) -> Self {
        Self::new(
            bucket,
            UploadSource::SeekableStream {
                reader,
                content_length,
            },
        )
        .with_key(key)
    }

    fn new(bucket: impl Into<String>, source: UploadSource) -> Self {
        Self {
            bucket: bucket.into(),
            key: None,
            source,
            options: ObjectOptions::default(),
            part_size: None,
            concurrency: None,
            progress: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_options(mut self, options: ObjectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Check the request and fill in the key when it can be derived
    pub fn validate(&mut self) -> Result<()> {
        require_bucket(&self.bucket)?;
        validate_overrides(self.part_size, self.concurrency)?;

        if let UploadSource::File(path) = &self.source {
            if !path.is_file() {
                return Err(TransferError::SourceNotFound(path.clone()));
            }
            if self.key.as_deref().is_none_or(str::is_empty) {
                self.key = Some(file_name_key(path)?);
            }
        }

        match self.key.as_deref() {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(TransferError::invalid(
                "key",
                "is required when uploading a stream",
            )),
        }
    }
}

/// Download of one object to a local file
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub bucket: String,
    pub key: String,
    pub destination: PathBuf,
    pub version_id: Option<String>,
    pub sse_customer: Option<CustomerKey>,
    pub progress: Option<ProgressReporter>,
}

impl DownloadRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            destination: destination.into(),
            version_id: None,
            sse_customer: None,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_bucket(&self.bucket)?;
        require_key(&self.key)?;
        if self.destination.as_os_str().is_empty() {
            return Err(TransferError::invalid("destination", "is required"));
        }
        Ok(())
    }
}

/// Streaming read of one object
#[derive(Debug, Clone)]
pub struct OpenStreamRequest {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub sse_customer: Option<CustomerKey>,
}

impl OpenStreamRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            sse_customer: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_bucket(&self.bucket)?;
        require_key(&self.key)
    }
}

/// Hook that may rewrite each per-file request of a directory upload
pub type UploadInterceptor = Arc<dyn Fn(&mut UploadRequest) + Send + Sync>;

/// Upload of a local directory tree
#[derive(Clone)]
pub struct UploadDirectoryRequest {
    pub bucket: String,
    pub directory: PathBuf,
    /// Prepended to every derived key
    pub key_prefix: Option<String>,
    /// Glob matched against file names, `*` when absent
    pub search_pattern: Option<String>,
    pub recursive: bool,
    /// Keep the key prefix exactly as given instead of ending it with `/`
    pub disable_slash_correction: bool,
    /// Upload several files at once instead of one at a time
    pub concurrent: bool,
    /// Applied to every file
    pub options: ObjectOptions,
    pub part_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub progress: Option<ProgressReporter>,
    pub interceptor: Option<UploadInterceptor>,
}

impl UploadDirectoryRequest {
    pub fn new(bucket: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            directory: directory.into(),
            key_prefix: None,
            search_pattern: None,
            recursive: false,
            disable_slash_correction: false,
            concurrent: false,
            options: ObjectOptions::default(),
            part_size: None,
            concurrency: None,
            progress: None,
            interceptor: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_search_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.search_pattern = Some(pattern.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&mut UploadRequest) + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_bucket(&self.bucket)?;
        validate_overrides(self.part_size, self.concurrency)?;
        if !self.directory.is_dir() {
            return Err(TransferError::SourceNotFound(self.directory.clone()));
        }
        if let Some(pattern) = &self.search_pattern {
            glob::Pattern::new(pattern)
                .map_err(|e| TransferError::invalid("search_pattern", e.to_string()))?;
        }
        Ok(())
    }
}

impl fmt::Debug for UploadDirectoryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadDirectoryRequest")
            .field("bucket", &self.bucket)
            .field("directory", &self.directory)
            .field("key_prefix", &self.key_prefix)
            .field("search_pattern", &self.search_pattern)
            .field("recursive", &self.recursive)
            .field("concurrent", &self.concurrent)
            .field("has_interceptor", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

/// Download of every object under a key prefix
#[derive(Debug, Clone)]
pub struct DownloadDirectoryRequest {
    pub bucket: String,
    pub key_prefix: String,
    pub destination: PathBuf,
    /// Only objects modified after this instant
    pub modified_since: Option<SystemTime>,
    /// Only objects not modified after this instant
    pub unmodified_since: Option<SystemTime>,
    /// Keep the prefix exactly as given instead of ending it with `/`
    pub disable_slash_correction: bool,
    /// Download several objects at once instead of one at a time
    pub concurrent: bool,
    pub concurrency: Option<usize>,
    pub progress: Option<ProgressReporter>,
}

impl DownloadDirectoryRequest {
    pub fn new(
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            destination: destination.into(),
            modified_since: None,
            unmodified_since: None,
            disable_slash_correction: false,
            concurrent: false,
            concurrency: None,
            progress: None,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_bucket(&self.bucket)?;
        validate_overrides(None, self.concurrency)?;
        if self.destination.as_os_str().is_empty() {
            return Err(TransferError::invalid("destination", "is required"));
        }
        Ok(())
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    /// Set when the object went up as a multipart upload
    pub upload_id: Option<String>,
    /// 1 for single-request uploads
    pub part_count: usize,
    pub bytes: u64,
}

/// Result of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bucket: String,
    pub key: String,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub etag: Option<String>,
    /// Retries spent on transient failures
    pub retries: u32,
}

/// Result of a directory transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryOutcome {
    /// Objects transferred
    pub objects: usize,
    pub bytes: u64,
    /// Local directories created for directory-marker keys
    pub directories_created: usize,
}

/// Result of a stale multipart upload sweep
#[derive(Debug, Clone, Default)]
pub struct AbortSweepOutcome {
    pub aborted: Vec<MultipartUploadSummary>,
}

fn require_bucket(bucket: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(TransferError::invalid("bucket", "is required"));
    }
    Ok(())
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TransferError::invalid("key", "is required"));
    }
    Ok(())
}

fn validate_overrides(part_size: Option<u64>, concurrency: Option<usize>) -> Result<()> {
    if part_size == Some(0) {
        return Err(TransferError::invalid("part_size", "must be greater than zero"));
    }
    if concurrency == Some(0) {
        return Err(TransferError::invalid("concurrency", "must be at least 1"));
    }
    Ok(())
}

fn file_name_key(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| TransferError::invalid("key", "cannot be derived from the file path"))
}

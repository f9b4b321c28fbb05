/*!
 * Transfer commands
 *
 * Each command drives one kind of transfer to completion against an
 * [`ObjectStorageClient`]. Commands are crate-private: callers reach them
 * through the [`TransferManager`](crate::TransferManager), which validates
 * requests first.
 */

pub(crate) mod abort_stale;
pub(crate) mod download;
pub(crate) mod download_directory;
pub(crate) mod multipart_upload;
pub(crate) mod open_stream;
pub(crate) mod single_upload;
pub(crate) mod upload_directory;

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use orbit_storage_interface::{BoxedReader, ObjectOptions, ObjectStorageClient};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::TransferConfig;
use crate::core::progress::reporter_sink;
use crate::core::{AdmissionGate, ProgressAggregator, ProgressSink};
use crate::error::{Result, TransferError};
use crate::request::{
    BoxedSeekableReader, SharedSeekableReader, UploadOutcome, UploadRequest, UploadSource,
};

pub(crate) type SharedClient = Arc<dyn ObjectStorageClient>;

/// Upload source with its length resolved
pub(crate) enum PreparedSource {
    File {
        path: PathBuf,
        length: u64,
    },
    Seekable {
        reader: SharedSeekableReader,
        start: u64,
        length: u64,
    },
    Stream {
        reader: BoxedReader,
        length: Option<u64>,
    },
}

impl PreparedSource {
    pub(crate) fn content_length(&self) -> Option<u64> {
        match self {
            PreparedSource::File { length, .. } => Some(*length),
            PreparedSource::Seekable { length, .. } => Some(*length),
            PreparedSource::Stream { length, .. } => *length,
        }
    }
}

/// A validated upload ready to run
pub(crate) struct PreparedUpload {
    pub bucket: String,
    pub key: String,
    pub source: PreparedSource,
    pub options: ObjectOptions,
    pub part_size: Option<u64>,
    pub concurrency: usize,
    pub progress: Arc<ProgressAggregator>,
}

/// Validate an upload request and resolve everything the commands need
///
/// `sink` replaces the request's own reporter; directory uploads use it to
/// fold per-file progress into the directory total.
pub(crate) async fn prepare_upload(
    mut request: UploadRequest,
    config: &TransferConfig,
    sink: Option<ProgressSink>,
) -> Result<PreparedUpload> {
    request.validate()?;
    let key = request
        .key
        .take()
        .ok_or_else(|| TransferError::invalid("key", "is required"))?;

    let mut file_path = None;
    let source = match request.source {
        UploadSource::File(path) => {
            let length = tokio::fs::metadata(&path)
                .await
                .map_err(|_| TransferError::SourceNotFound(path.clone()))?
                .len();
            file_path = Some(path.clone());
            PreparedSource::File { path, length }
        }
        UploadSource::SeekableStream {
            reader,
            content_length,
        } => {
            let (start, length) = {
                let mut stream = reader.lock().await;
                let start = stream.stream_position().await?;
                let length = match content_length {
                    Some(length) => length,
                    None => {
                        let end = stream.seek(SeekFrom::End(0)).await?;
                        stream.seek(SeekFrom::Start(start)).await?;
                        end.saturating_sub(start)
                    }
                };
                (start, length)
            };
            PreparedSource::Seekable {
                reader,
                start,
                length,
            }
        }
        UploadSource::Stream {
            reader,
            content_length,
        } => PreparedSource::Stream {
            reader,
            length: content_length,
        },
    };

    let mut options = request.options;
    if options.content_type.is_none() {
        let guess = match &file_path {
            Some(path) => mime_guess::from_path(path),
            None => mime_guess::from_path(&key),
        };
        options.content_type = Some(guess.first_or_octet_stream().to_string());
    }

    let sink = sink.or_else(|| request.progress.map(reporter_sink));
    let progress = Arc::new(ProgressAggregator::new(
        key.clone(),
        file_path,
        source.content_length(),
        config.progress_interval,
        sink,
    ));

    Ok(PreparedUpload {
        bucket: request.bucket,
        key,
        source,
        options,
        part_size: request.part_size,
        concurrency: request
            .concurrency
            .unwrap_or(config.concurrent_service_requests),
        progress,
    })
}

/// Run a prepared upload as a single PUT or a multipart upload
///
/// Multipart is used at or above the configured threshold and whenever the
/// length is unknown.
pub(crate) async fn run_upload(
    client: &SharedClient,
    config: &TransferConfig,
    upload: PreparedUpload,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    match upload.source.content_length() {
        Some(length) if length < config.min_size_before_part_upload => {
            single_upload::run(client, upload, network_gate, cancel).await
        }
        _ => multipart_upload::run(client, config, upload, network_gate, cancel).await,
    }
}

/// Exclusive view of a shared seekable stream, held while it is read
struct GuardedReader(OwnedMutexGuard<BoxedSeekableReader>);

impl AsyncRead for GuardedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.0).poll_read(cx, buf)
    }
}

/// Read `length` bytes of a shared stream starting at `offset`
///
/// The stream stays locked until the returned reader is dropped.
pub(crate) async fn read_shared(
    shared: &SharedSeekableReader,
    offset: u64,
    length: u64,
) -> Result<BoxedReader> {
    let mut guard = shared.clone().lock_owned().await;
    guard.seek(SeekFrom::Start(offset)).await?;
    Ok(Box::new(GuardedReader(guard).take(length)))
}

/// Put a shared stream back at the position its upload started from
pub(crate) async fn restore_position(shared: &SharedSeekableReader, start: u64) {
    let mut stream = shared.lock().await;
    if let Err(err) = stream.seek(SeekFrom::Start(start)).await {
        warn!(error = %err, "Failed to restore source stream position");
    }
}

/// Race `future` against caller cancellation
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = future => result,
    }
}

/// Acquire a slot on an optional shared gate
pub(crate) async fn acquire_optional(
    gate: Option<&AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<Option<crate::core::GatePermit>> {
    match gate {
        Some(gate) => Ok(Some(cancellable(cancel, gate.acquire()).await?)),
        None => Ok(None),
    }
}

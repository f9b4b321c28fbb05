//! Multipart uploads
//!
//! Two strategies share one session lifecycle:
//!
//! - **Known length** (files and seekable streams): parts are planned up
//!   front and uploaded through the admission gate. Files are read through
//!   one handle per part so parts run in parallel; a seekable stream has a
//!   single read position, so its parts run one at a time.
//! - **Forward-only streams**: the source is buffered into parts with a
//!   look-ahead read that detects the last part. One part is in flight
//!   while the next is buffered.
//!
//! Every initiated upload ends in exactly one of completion or abort.

use std::io::{Cursor, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use orbit_storage_interface::{
    AbortMultipartUploadRequest, BoxedReader, ChecksumAlgorithm, CompleteMultipartUploadOutput,
    CompleteMultipartUploadRequest, CompletedPart, CustomerKey, InitiateMultipartUploadRequest,
    ObjectOptions, UploadPartRequest,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    acquire_optional, cancellable, read_shared, restore_position, PreparedSource, PreparedUpload,
    SharedClient,
};
use crate::config::TransferConfig;
use crate::core::{
    effective_part_size, plan_parts, read_full, AdmissionGate, FanOut, PartDescriptor,
    ProgressAggregator, ProgressReader,
};
use crate::error::{Result, TransferError};
use crate::request::{SharedSeekableReader, UploadOutcome};

/// Everything a part upload needs to address its multipart upload
struct PartTarget {
    client: SharedClient,
    bucket: String,
    key: String,
    upload_id: String,
    checksum_algorithm: Option<ChecksumAlgorithm>,
    sse_customer: Option<CustomerKey>,
}

impl PartTarget {
    async fn upload(
        &self,
        part_number: i32,
        body: BoxedReader,
        content_length: u64,
        is_last_part: bool,
    ) -> Result<CompletedPart> {
        let output = self
            .client
            .upload_part(UploadPartRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: self.upload_id.clone(),
                part_number,
                body,
                content_length,
                is_last_part,
                checksum_algorithm: self.checksum_algorithm,
                sse_customer: self.sse_customer.clone(),
            })
            .await?;

        debug!(part_number, bytes = content_length, is_last_part, "Uploaded part");
        Ok(CompletedPart {
            part_number,
            etag: output.etag,
            checksum: output.checksum,
        })
    }
}

/// An open multipart upload
struct MultipartSession {
    target: Arc<PartTarget>,
}

impl MultipartSession {
    async fn initiate(
        client: &SharedClient,
        bucket: &str,
        key: &str,
        options: &ObjectOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let output = cancellable(cancel, async {
            Ok(client
                .initiate_multipart_upload(InitiateMultipartUploadRequest {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    options: options.clone(),
                })
                .await?)
        })
        .await?;

        info!(upload_id = %output.upload_id, "Initiated multipart upload");
        Ok(Self {
            target: Arc::new(PartTarget {
                client: client.clone(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: output.upload_id,
                checksum_algorithm: options.checksum_algorithm,
                sse_customer: options
                    .encryption
                    .as_ref()
                    .and_then(|sse| sse.customer_key())
                    .cloned(),
            }),
        })
    }

    fn upload_id(&self) -> &str {
        &self.target.upload_id
    }

    /// Assemble the parts; `expected` enforces the planned part count
    async fn complete(
        &self,
        mut parts: Vec<CompletedPart>,
        expected: Option<usize>,
    ) -> Result<CompleteMultipartUploadOutput> {
        if let Some(expected) = expected {
            if parts.len() != expected {
                return Err(TransferError::IncompleteUpload {
                    upload_id: self.target.upload_id.clone(),
                    expected,
                    actual: parts.len(),
                });
            }
        }
        parts.sort_by_key(|part| part.part_number);

        let output = self
            .target
            .client
            .complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket: self.target.bucket.clone(),
                key: self.target.key.clone(),
                upload_id: self.target.upload_id.clone(),
                parts,
                checksum_algorithm: self.target.checksum_algorithm,
                sse_customer: self.target.sse_customer.clone(),
            })
            .await?;
        Ok(output)
    }

    /// Let dispatched parts settle, then abort the upload
    ///
    /// Abort failures are logged; the caller always returns `cause`.
    async fn abandon(
        &self,
        fan: &mut FanOut<CompletedPart>,
        finalize_timeout: Duration,
        cause: &TransferError,
    ) {
        fan.settle(Some(finalize_timeout)).await;

        let result = self
            .target
            .client
            .abort_multipart_upload(AbortMultipartUploadRequest {
                bucket: self.target.bucket.clone(),
                key: self.target.key.clone(),
                upload_id: self.target.upload_id.clone(),
            })
            .await;

        match result {
            Ok(()) => info!(
                upload_id = %self.target.upload_id,
                cause = %cause,
                "Aborted multipart upload"
            ),
            Err(abort_err) => warn!(
                upload_id = %self.target.upload_id,
                cause = %cause,
                error = %abort_err,
                "Failed to abort multipart upload"
            ),
        }
    }
}

/// How a known-length part gets its bytes
#[derive(Clone)]
enum PartReader {
    File(std::path::PathBuf),
    Seekable {
        shared: SharedSeekableReader,
        start: u64,
    },
}

impl PartReader {
    async fn open(&self, part: PartDescriptor) -> Result<BoxedReader> {
        match self {
            PartReader::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(part.offset)).await?;
                Ok(Box::new(file.take(part.length)))
            }
            PartReader::Seekable { shared, start } => {
                read_shared(shared, start + part.offset, part.length).await
            }
        }
    }
}

/// Upload through a multipart session, choosing the strategy by source
#[instrument(skip_all, fields(bucket = %upload.bucket, key = %upload.key))]
pub(crate) async fn run(
    client: &SharedClient,
    config: &TransferConfig,
    upload: PreparedUpload,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let restore = match &upload.source {
        PreparedSource::Seekable { reader, start, .. } => Some((reader.clone(), *start)),
        _ => None,
    };
    let outcome = upload_in_session(client, config, upload, network_gate, cancel).await;
    if let Some((reader, start)) = restore {
        restore_position(&reader, start).await;
    }
    outcome
}

async fn upload_in_session(
    client: &SharedClient,
    config: &TransferConfig,
    upload: PreparedUpload,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let PreparedUpload {
        bucket,
        key,
        source,
        options,
        part_size,
        concurrency,
        progress,
    } = upload;

    let session = MultipartSession::initiate(client, &bucket, &key, &options, cancel).await?;
    let finalize_timeout = config.multipart_finalize_timeout();

    let (mut fan, result) = match source {
        PreparedSource::File { path, length } => {
            let planned = plan_parts(length, effective_part_size(part_size, Some(length)));
            let gate = network_gate
                .clone()
                .unwrap_or_else(|| AdmissionGate::new(concurrency.min(planned.len())));
            let mut fan = FanOut::new(gate, cancel);
            let result = upload_planned_parts(
                &session,
                &mut fan,
                PartReader::File(path),
                planned,
                &progress,
                None,
                cancel,
            )
            .await
            .map(|(output, parts)| (output, parts, length));
            (fan, result)
        }
        PreparedSource::Seekable {
            reader,
            start,
            length,
        } => {
            let planned = plan_parts(length, effective_part_size(part_size, Some(length)));
            let mut fan = FanOut::new(AdmissionGate::new(1), cancel);
            let reader = PartReader::Seekable {
                shared: reader,
                start,
            };
            let result = upload_planned_parts(
                &session,
                &mut fan,
                reader,
                planned,
                &progress,
                network_gate.clone(),
                cancel,
            )
            .await
            .map(|(output, parts)| (output, parts, length));
            (fan, result)
        }
        PreparedSource::Stream { reader, length } => {
            let part_size = effective_part_size(part_size, length);
            let mut fan = FanOut::new(AdmissionGate::new(1), cancel);
            let result = upload_stream_parts(
                &session,
                &mut fan,
                reader,
                part_size,
                config.read_buffer_size,
                &progress,
                network_gate.clone(),
                cancel,
            )
            .await;
            (fan, result)
        }
    };

    match result {
        Ok((output, part_count, bytes)) => {
            progress.finish();
            info!(
                upload_id = %session.upload_id(),
                parts = part_count,
                bytes,
                "Completed multipart upload"
            );
            Ok(UploadOutcome {
                bucket,
                key,
                etag: output.etag,
                version_id: output.version_id,
                upload_id: Some(session.upload_id().to_string()),
                part_count,
                bytes,
            })
        }
        Err(err) => {
            session.abandon(&mut fan, finalize_timeout, &err).await;
            Err(err)
        }
    }
}

/// Known-length path: dispatch every planned part, then complete
async fn upload_planned_parts(
    session: &MultipartSession,
    fan: &mut FanOut<CompletedPart>,
    reader: PartReader,
    planned: Vec<PartDescriptor>,
    progress: &Arc<ProgressAggregator>,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<(CompleteMultipartUploadOutput, usize)> {
    let part_count = planned.len();
    debug!(parts = part_count, "Planned multipart upload");

    for part in planned {
        let reader = reader.clone();
        let target = session.target.clone();
        let progress = progress.clone();
        let network_gate = network_gate.clone();
        let cancel = cancel.clone();
        let is_last_part = part.part_number as usize == part_count;

        let accepted = fan
            .spawn(async move {
                let _permit = acquire_optional(network_gate.as_ref(), &cancel).await?;
                let body = reader.open(part).await?;
                let body: BoxedReader = Box::new(ProgressReader::new(body, progress));
                target
                    .upload(part.part_number, body, part.length, is_last_part)
                    .await
            })
            .await;
        if !accepted {
            break;
        }
    }

    let parts = fan.join().await?;
    let output = session.complete(parts, Some(part_count)).await?;
    Ok((output, part_count))
}

/// Forward-only path: buffer parts with a look-ahead read
///
/// After each chunk is appended, one more chunk is read. The buffer is
/// flushed as a part once it reaches the part size or the look-ahead comes
/// back empty; an empty look-ahead also marks that part as the last one.
/// An empty source therefore still produces exactly one empty part.
#[allow(clippy::too_many_arguments)]
async fn upload_stream_parts(
    session: &MultipartSession,
    fan: &mut FanOut<CompletedPart>,
    reader: BoxedReader,
    part_size: u64,
    chunk_size: usize,
    progress: &Arc<ProgressAggregator>,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<(CompleteMultipartUploadOutput, usize, u64)> {
    let part_size = usize::try_from(part_size)
        .map_err(|_| TransferError::invalid("part_size", "exceeds addressable memory"))?;
    let mut reader = ProgressReader::new(reader, progress.clone());
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut buffer = BytesMut::with_capacity(part_size + chunk.len());
    let mut part_number = 1i32;
    let mut bytes = 0u64;

    let mut pending = read_chunk(&mut reader, &mut chunk, cancel).await?;
    loop {
        buffer.extend_from_slice(&chunk[..pending]);
        pending = read_chunk(&mut reader, &mut chunk, cancel).await?;
        let exhausted = pending == 0;

        if buffer.len() < part_size && !exhausted {
            continue;
        }

        let body = buffer.split().freeze();
        let length = body.len() as u64;
        bytes += length;

        let target = session.target.clone();
        let network_gate = network_gate.clone();
        let task_cancel = cancel.clone();
        let number = part_number;
        let accepted = fan
            .spawn(async move {
                let _permit = acquire_optional(network_gate.as_ref(), &task_cancel).await?;
                target
                    .upload(number, Box::new(Cursor::new(body)), length, exhausted)
                    .await
            })
            .await;

        if !accepted || exhausted {
            break;
        }
        part_number += 1;
    }

    let parts = fan.join().await?;
    let part_count = parts.len();
    let output = session.complete(parts, None).await?;
    Ok((output, part_count, bytes))
}

async fn read_chunk(
    reader: &mut ProgressReader<BoxedReader>,
    chunk: &mut [u8],
    cancel: &CancellationToken,
) -> Result<usize> {
    cancellable(cancel, async { Ok(read_full(reader, chunk).await?) }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::prepare_upload;
    use crate::request::UploadRequest;
    use crate::testing::InMemoryStorage;
    use crate::core::MIN_PART_SIZE;

    fn small_part_config() -> TransferConfig {
        TransferConfig {
            min_size_before_part_upload: 0,
            read_buffer_size: 64 * 1024,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stream_parts_flag_only_the_last() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_bucket("b");
        let client: SharedClient = storage.clone();
        let config = small_part_config();

        let data = vec![3u8; (2 * MIN_PART_SIZE + 10) as usize];
        let request = UploadRequest::from_stream("b", "stream.bin", Cursor::new(data.clone()), None);
        let prepared = prepare_upload(request, &config, None).await.unwrap();

        let outcome = run(&client, &config, prepared, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.part_count, 3);
        let calls = storage.part_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.iter().filter(|c| c.is_last_part).count(), 1);
        assert!(calls.last().unwrap().is_last_part);
        assert_eq!(storage.object("b", "stream.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_stream_uploads_one_empty_part() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_bucket("b");
        let client: SharedClient = storage.clone();
        let config = small_part_config();

        let request = UploadRequest::from_stream("b", "empty.bin", &b""[..], None);
        let prepared = prepare_upload(request, &config, None).await.unwrap();
        let outcome = run(&client, &config, prepared, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.part_count, 1);
        let calls = storage.part_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content_length, 0);
        assert!(calls[0].is_last_part);
        assert_eq!(storage.object("b", "empty.bin").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_seekable_stream_parts_are_serialized() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_bucket("b");
        let client: SharedClient = storage.clone();
        let config = small_part_config();

        let data: Vec<u8> = (0..(3 * MIN_PART_SIZE + 1)).map(|i| (i % 251) as u8).collect();
        let request = UploadRequest::from_seekable("b", "seek.bin", Cursor::new(data.clone()), None)
            .with_concurrency(8);
        let prepared = prepare_upload(request, &config, None).await.unwrap();
        let outcome = run(&client, &config, prepared, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.part_count, 4);
        assert_eq!(storage.peak_concurrent_part_uploads(), 1);
        assert_eq!(storage.object("b", "seek.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_bucket("b");
        storage.fail_part_upload(2);
        let client: SharedClient = storage.clone();
        let config = small_part_config();

        let data = vec![1u8; (3 * MIN_PART_SIZE) as usize];
        let request = UploadRequest::from_stream("b", "fail.bin", Cursor::new(data), None);
        let prepared = prepare_upload(request, &config, None).await.unwrap();
        let err = run(&client, &config, prepared, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Storage(_)));
        assert_eq!(storage.aborted_uploads().len(), 1);
        assert!(storage.open_uploads("b").is_empty());
        assert!(storage.object("b", "fail.bin").is_none());
    }
}

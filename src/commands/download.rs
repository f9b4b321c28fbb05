//! Resumable downloads
//!
//! The download runs an explicit retry loop. Transient failures resume
//! from the current length of the local file with an open-ended byte
//! range; an ETag change between attempts means the object was replaced,
//! so the local file is truncated and the download restarts from zero.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use orbit_storage_interface::{ByteRange, CustomerKey, GetObjectRequest};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{cancellable, SharedClient};
use crate::core::{backoff_delay, byte_range_remaining, ProgressAggregator, ProgressReader, RetryPolicy};
use crate::error::{Result, TransferError};
use crate::request::DownloadOutcome;

/// A validated download
pub(crate) struct DownloadJob {
    pub bucket: String,
    pub key: String,
    pub destination: PathBuf,
    pub version_id: Option<String>,
    pub sse_customer: Option<CustomerKey>,
    pub progress: Arc<ProgressAggregator>,
    pub max_retries: u32,
}

/// Loop state carried between attempts
#[derive(Debug, Default)]
struct AttemptState {
    retries: u32,
    total_retries: u32,
    last_etag: Option<String>,
    range: Option<ByteRange>,
    object_size: Option<u64>,
    truncate: bool,
}

enum Attempt {
    Finished,
    ObjectChanged,
}

#[instrument(skip_all, fields(bucket = %job.bucket, key = %job.key))]
pub(crate) async fn run(
    client: &SharedClient,
    job: DownloadJob,
    cancel: &CancellationToken,
) -> Result<DownloadOutcome> {
    if let Some(parent) = job.destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let policy = RetryPolicy::new(job.max_retries);
    let mut state = AttemptState {
        truncate: true,
        ..Default::default()
    };

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if already_complete(&state) {
            debug!("Local file already holds the whole object");
            break;
        }

        match attempt(client, &job, &mut state, cancel).await {
            Ok(Attempt::Finished) => break,
            Ok(Attempt::ObjectChanged) => {
                warn!(
                    etag = ?state.last_etag,
                    "Object changed during download, restarting from the beginning"
                );
                state.range = None;
                state.object_size = None;
                state.retries = 0;
                state.truncate = true;
                job.progress.restart();
                wait(backoff_delay(0), cancel).await?;
            }
            Err(err) if err.is_cancelled() => return Err(TransferError::Cancelled),
            Err(err) if policy.should_retry(&err, state.retries) => {
                let delay = backoff_delay(state.retries);
                state.retries += 1;
                state.total_retries += 1;
                warn!(
                    attempt = state.retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Download interrupted, resuming"
                );
                wait(delay, cancel).await?;

                // Nothing written yet means a stale local file must not be resumed
                if !state.truncate {
                    let range = byte_range_remaining(&job.destination).await?;
                    job.progress.rewind_to(range.start);
                    state.range = Some(range);
                }
            }
            Err(err) => return Err(err.into_root_cause()),
        }
    }

    let bytes_written = tokio::fs::metadata(&job.destination).await?.len();
    job.progress.finish();
    info!(
        bytes = bytes_written,
        retries = state.total_retries,
        "Downloaded object"
    );

    Ok(DownloadOutcome {
        bucket: job.bucket,
        key: job.key,
        path: job.destination,
        bytes_written,
        etag: state.last_etag,
        retries: state.total_retries,
    })
}

fn already_complete(state: &AttemptState) -> bool {
    matches!(
        (state.range, state.object_size),
        (Some(range), Some(size)) if range.start >= size
    )
}

async fn attempt(
    client: &SharedClient,
    job: &DownloadJob,
    state: &mut AttemptState,
    cancel: &CancellationToken,
) -> Result<Attempt> {
    let response = cancellable(cancel, async {
        Ok(client
            .get_object(GetObjectRequest {
                bucket: job.bucket.clone(),
                key: job.key.clone(),
                range: state.range,
                version_id: job.version_id.clone(),
                sse_customer: job.sse_customer.clone(),
            })
            .await?)
    })
    .await?;

    let changed = matches!(
        (&state.last_etag, &response.etag),
        (Some(previous), Some(current)) if previous != current
    );
    if changed {
        state.last_etag = response.etag;
        return Ok(Attempt::ObjectChanged);
    }
    if response.etag.is_some() {
        state.last_etag = response.etag.clone();
    }

    let object_size = response.object_size.or(match state.range {
        None => response.content_length,
        Some(_) => None,
    });
    if let Some(size) = object_size {
        state.object_size = Some(size);
        job.progress.set_total(size);
    }

    let mut file = open_destination(&job.destination, state.truncate).await?;
    state.truncate = false;
    debug!(range = ?state.range.map(|r| r.to_header()), "Writing response body");

    let mut body = ProgressReader::new(response.body, job.progress.clone());
    let copied = cancellable(cancel, async {
        Ok(tokio::io::copy(&mut body, &mut file).await?)
    })
    .await;
    let flushed = file.flush().await;

    copied?;
    flushed?;
    Ok(Attempt::Finished)
}

async fn open_destination(path: &Path, truncate: bool) -> Result<tokio::fs::File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    Ok(options.open(path).await?)
}

async fn wait(delay: std::time::Duration, cancel: &CancellationToken) -> Result<()> {
    cancellable(cancel, async {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_when_offset_reaches_size() {
        let state = AttemptState {
            range: Some(ByteRange::from_offset(100)),
            object_size: Some(100),
            ..Default::default()
        };
        assert!(already_complete(&state));

        let state = AttemptState {
            range: Some(ByteRange::from_offset(99)),
            object_size: Some(100),
            ..Default::default()
        };
        assert!(!already_complete(&state));

        let state = AttemptState {
            range: None,
            object_size: Some(0),
            ..Default::default()
        };
        assert!(!already_complete(&state));
    }

    #[tokio::test]
    async fn test_destination_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut file = open_destination(&path, true).await.unwrap();
        file.write_all(b"hello").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut file = open_destination(&path, false).await.unwrap();
        file.write_all(b" world").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        let mut file = open_destination(&path, true).await.unwrap();
        file.write_all(b"x").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"x");
    }
}

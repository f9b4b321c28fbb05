//! Directory uploads
//!
//! Files are enumerated and sized before anything is sent, so directory
//! progress has a denominator from the first event. Two gates bound the
//! work: the outer fan-out limits how many files are in progress, and a
//! shared network gate limits requests across every file's own parts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::{prepare_upload, run_upload, SharedClient};
use crate::config::TransferConfig;
use crate::core::{AdmissionGate, DirectoryProgressTracker, FanOut};
use crate::error::{Result, TransferError};
use crate::request::{DirectoryOutcome, UploadDirectoryRequest, UploadOutcome, UploadRequest};

/// A local file selected for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalFile {
    pub path: PathBuf,
    pub key: String,
    pub size: u64,
}

#[instrument(skip_all, fields(bucket = %request.bucket, directory = %request.directory.display()))]
pub(crate) async fn run(
    client: &SharedClient,
    config: &Arc<TransferConfig>,
    request: UploadDirectoryRequest,
    cancel: &CancellationToken,
) -> Result<DirectoryOutcome> {
    let prefix = normalize_prefix(request.key_prefix.as_deref(), request.disable_slash_correction);
    let files = {
        let directory = request.directory.clone();
        let pattern = request.search_pattern.clone();
        let recursive = request.recursive;
        tokio::task::spawn_blocking(move || {
            enumerate_files(&directory, pattern.as_deref(), recursive, &prefix)
        })
        .await??
    };

    let total_bytes: u64 = files.iter().map(|file| file.size).sum();
    info!(
        files = files.len(),
        total_bytes,
        concurrent = request.concurrent,
        "Uploading directory"
    );

    let concurrency = request
        .concurrency
        .unwrap_or(config.concurrent_service_requests);
    let tracker = Arc::new(DirectoryProgressTracker::new(
        request.progress.clone(),
        files.len() as u64,
        total_bytes,
        !request.concurrent,
    ));
    let network_gate = if client.is_encrypting() {
        None
    } else {
        Some(AdmissionGate::new(concurrency))
    };
    let file_gate = AdmissionGate::new(if request.concurrent { concurrency } else { 1 });
    let mut fan: FanOut<UploadOutcome> = FanOut::new(file_gate, cancel).cooperative();

    for file in files {
        let mut upload = UploadRequest::from_file(request.bucket.clone(), file.path.clone())
            .with_key(file.key.clone())
            .with_options(request.options.clone());
        upload.part_size = request.part_size;
        upload.concurrency = Some(concurrency);
        if let Some(interceptor) = &request.interceptor {
            interceptor(&mut upload);
        }

        let client = client.clone();
        let config = config.clone();
        let tracker = tracker.clone();
        let network_gate = network_gate.clone();
        let task_cancel = cancel.clone();
        let accepted = fan
            .spawn(async move {
                let key = upload.key.clone().unwrap_or_default();
                let sink = tracker.file_sink(key, file.path.clone(), file.size);
                let prepared = prepare_upload(upload, &config, Some(sink)).await?;
                let outcome =
                    run_upload(&client, &config, prepared, network_gate, &task_cancel).await?;
                tracker.file_completed(outcome.key.clone(), file.path, outcome.bytes);
                Ok(outcome)
            })
            .await;
        if !accepted {
            debug!("Stopped scheduling files after a failure");
            break;
        }
    }

    let outcomes = fan.join_settled().await.inspect_err(|err| {
        if !err.is_cancelled() {
            warn!(error = %err, "Directory upload failed");
        }
    })?;

    let outcome = DirectoryOutcome {
        objects: outcomes.len(),
        bytes: outcomes.iter().map(|o| o.bytes).sum(),
        directories_created: 0,
    };
    info!(objects = outcome.objects, bytes = outcome.bytes, "Uploaded directory");
    Ok(outcome)
}

/// Key prefix with any leading separator removed
///
/// A non-empty prefix gets a trailing `/` unless correction is disabled.
pub(crate) fn normalize_prefix(prefix: Option<&str>, disable_slash_correction: bool) -> String {
    let prefix = prefix.unwrap_or_default().trim_start_matches(['/', '\\']);
    let mut prefix = prefix.replace('\\', "/");
    if !prefix.is_empty() && !disable_slash_correction && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

/// Walk `directory` and collect files whose name matches `pattern`
pub(crate) fn enumerate_files(
    directory: &Path,
    pattern: Option<&str>,
    recursive: bool,
    prefix: &str,
) -> Result<Vec<LocalFile>> {
    let pattern = Pattern::new(pattern.unwrap_or("*"))
        .map_err(|e| TransferError::invalid("search_pattern", e.to_string()))?;

    let mut walker = WalkDir::new(directory).min_depth(1).follow_links(true);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let message = e.to_string();
            TransferError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(message)),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !pattern.matches(&name) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(directory)
            .map_err(|_| TransferError::invalid("directory", "entry outside of directory"))?;
        let key = format!("{}{}", prefix, relative_key(relative));
        let size = entry.metadata().map_err(std::io::Error::from)?.len();

        files.push(LocalFile {
            path: entry.path().to_path_buf(),
            key,
            size,
        });
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

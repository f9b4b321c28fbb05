//! Directory downloads
//!
//! The listing is collected and filtered up front; every destination path
//! is checked before the first byte moves, so a hostile key can never write
//! outside the destination directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use orbit_storage_interface::{ListObjectsRequest, ObjectSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::download::{self, DownloadJob};
use super::upload_directory::normalize_prefix;
use super::{cancellable, SharedClient};
use crate::config::TransferConfig;
use crate::core::{AdmissionGate, DirectoryProgressTracker, FanOut, ProgressAggregator};
use crate::error::{Result, TransferError};
use crate::request::{DirectoryOutcome, DownloadDirectoryRequest, DownloadOutcome};

/// Sidecar written by encrypting clients next to each object
const INSTRUCTION_FILE_SUFFIX: &str = ".instruction";

/// A listed object mapped onto the local tree
#[derive(Debug, Clone, PartialEq, Eq)]
enum Planned {
    File {
        key: String,
        path: PathBuf,
        size: u64,
    },
    Directory(PathBuf),
}

#[instrument(skip_all, fields(bucket = %request.bucket, prefix = %request.key_prefix))]
pub(crate) async fn run(
    client: &SharedClient,
    config: &Arc<TransferConfig>,
    request: DownloadDirectoryRequest,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<DirectoryOutcome> {
    let prefix = normalize_prefix(Some(&request.key_prefix), request.disable_slash_correction);
    let listed = list_all(client, &request.bucket, &prefix, cancel).await?;
    let encrypting = client.is_encrypting();

    let selected: Vec<ObjectSummary> = listed
        .into_iter()
        .filter(|object| !(encrypting && object.key.ends_with(INSTRUCTION_FILE_SUFFIX)))
        .filter(|object| {
            passes_time_filters(
                object.last_modified,
                request.modified_since,
                request.unmodified_since,
            )
        })
        .collect();

    let plan = plan_destinations(&selected, &prefix, &request.destination)?;
    let total_bytes: u64 = plan
        .iter()
        .map(|entry| match entry {
            Planned::File { size, .. } => *size,
            Planned::Directory(_) => 0,
        })
        .sum();
    let file_count = plan
        .iter()
        .filter(|entry| matches!(entry, Planned::File { .. }))
        .count();
    info!(
        objects = file_count,
        total_bytes,
        concurrent = request.concurrent,
        "Downloading directory"
    );

    tokio::fs::create_dir_all(&request.destination).await?;
    let mut directories_created = 0;
    for entry in &plan {
        if let Planned::Directory(path) = entry {
            tokio::fs::create_dir_all(path).await?;
            directories_created += 1;
        }
    }

    let concurrency = request
        .concurrency
        .unwrap_or(config.concurrent_service_requests);
    let tracker = Arc::new(DirectoryProgressTracker::new(
        request.progress.clone(),
        file_count as u64,
        total_bytes,
        !request.concurrent,
    ));
    let gate = AdmissionGate::new(if request.concurrent { concurrency } else { 1 });
    let mut fan: FanOut<DownloadOutcome> = FanOut::new(gate, cancel).cooperative();

    for entry in plan {
        let Planned::File { key, path, size } = entry else {
            continue;
        };

        let client = client.clone();
        let tracker = tracker.clone();
        let bucket = request.bucket.clone();
        let progress_interval = config.progress_interval;
        let task_cancel = cancel.clone();
        let accepted = fan
            .spawn(async move {
                let sink = tracker.file_sink(key.clone(), path.clone(), size);
                let job = DownloadJob {
                    bucket,
                    key: key.clone(),
                    destination: path.clone(),
                    version_id: None,
                    sse_customer: None,
                    progress: Arc::new(ProgressAggregator::new(
                        key.clone(),
                        Some(path.clone()),
                        Some(size),
                        progress_interval,
                        Some(sink),
                    )),
                    max_retries,
                };
                let outcome = download::run(&client, job, &task_cancel).await?;
                tracker.file_completed(key, path, outcome.bytes_written);
                Ok(outcome)
            })
            .await;
        if !accepted {
            debug!("Stopped scheduling downloads after a failure");
            break;
        }
    }

    let outcomes = fan.join_settled().await.inspect_err(|err| {
        if !err.is_cancelled() {
            warn!(error = %err, "Directory download failed");
        }
    })?;

    let outcome = DirectoryOutcome {
        objects: outcomes.len(),
        bytes: outcomes.iter().map(|o| o.bytes_written).sum(),
        directories_created,
    };
    info!(
        objects = outcome.objects,
        bytes = outcome.bytes,
        "Downloaded directory"
    );
    Ok(outcome)
}

/// Collect every object under `prefix`
///
/// Uses the paginated v2 listing and falls back to the legacy marker
/// listing when the endpoint does not implement v2.
async fn list_all(
    client: &SharedClient,
    bucket: &str,
    prefix: &str,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectSummary>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;
    let mut legacy = false;

    loop {
        let request = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            continuation_token: token.take(),
            max_keys: None,
        };

        let page = if legacy {
            cancellable(cancel, async { Ok(client.list_objects(request).await?) }).await?
        } else {
            let attempt = cancellable(cancel, async {
                Ok(client.list_objects_v2(request.clone()).await)
            })
            .await?;
            match attempt {
                Ok(page) => page,
                Err(err) if err.is_not_implemented() => {
                    debug!("Endpoint lacks ListObjectsV2, using legacy listing");
                    legacy = true;
                    cancellable(cancel, async { Ok(client.list_objects(request).await?) }).await?
                }
                Err(err) => return Err(err.into()),
            }
        };

        objects.extend(page.objects);
        match page.next_continuation_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(objects = objects.len(), "Listed objects");
    Ok(objects)
}

/// `modified_since` keeps objects modified strictly after the instant;
/// `unmodified_since` keeps objects not modified after it.
///
/// Objects without a modification time pass both filters.
fn passes_time_filters(
    last_modified: Option<SystemTime>,
    modified_since: Option<SystemTime>,
    unmodified_since: Option<SystemTime>,
) -> bool {
    let Some(modified) = last_modified else {
        return true;
    };
    if let Some(since) = modified_since {
        if modified <= since {
            return false;
        }
    }
    if let Some(until) = unmodified_since {
        if modified > until {
            return false;
        }
    }
    true
}

fn plan_destinations(
    objects: &[ObjectSummary],
    prefix: &str,
    destination: &Path,
) -> Result<Vec<Planned>> {
    let mut plan = Vec::with_capacity(objects.len());
    for object in objects {
        let relative = object
            .key
            .strip_prefix(prefix)
            .unwrap_or(&object.key)
            .trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }

        let local = safe_relative_path(relative).ok_or_else(|| {
            TransferError::invalid(
                "key",
                format!("'{}' would resolve outside the destination directory", object.key),
            )
        })?;

        if object.key.ends_with('/') {
            plan.push(Planned::Directory(destination.join(local)));
        } else {
            plan.push(Planned::File {
                key: object.key.clone(),
                path: destination.join(local),
                size: object.size,
            });
        }
    }
    Ok(plan)
}

/// Map a `/`-separated key suffix onto a relative path
///
/// Returns `None` for parent references or anything absolute.
fn safe_relative_path(relative: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            (Some(Component::CurDir), None) => {}
            _ => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn object(key: &str, size: u64) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            size,
            etag: None,
            last_modified: None,
        }
    }

    #[test]
    fn test_time_filters() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let later = base + Duration::from_secs(10);

        assert!(passes_time_filters(Some(later), Some(base), None));
        assert!(!passes_time_filters(Some(base), Some(base), None));
        assert!(passes_time_filters(Some(base), None, Some(base)));
        assert!(!passes_time_filters(Some(later), None, Some(base)));
        assert!(passes_time_filters(None, Some(base), Some(base)));
    }

    #[test]
    fn test_plan_maps_keys_under_destination() {
        let objects = vec![
            object("photos/2024/a.jpg", 10),
            object("photos/2024/", 0),
            object("photos/b.jpg", 5),
        ];
        let plan = plan_destinations(&objects, "photos/", Path::new("/dest")).unwrap();
        assert_eq!(
            plan,
            vec![
                Planned::File {
                    key: "photos/2024/a.jpg".to_string(),
                    path: PathBuf::from("/dest/2024/a.jpg"),
                    size: 10,
                },
                Planned::Directory(PathBuf::from("/dest/2024")),
                Planned::File {
                    key: "photos/b.jpg".to_string(),
                    path: PathBuf::from("/dest/b.jpg"),
                    size: 5,
                },
            ]
        );
    }

    #[test]
    fn test_prefix_marker_itself_skipped() {
        let objects = vec![object("photos/", 0)];
        let plan = plan_destinations(&objects, "photos/", Path::new("/dest")).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_escaping_keys_rejected() {
        let objects = vec![object("photos/../../etc/passwd", 10)];
        let err = plan_destinations(&objects, "photos/", Path::new("/dest")).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { field: "key", .. }));

        assert!(safe_relative_path("a/./b").is_some());
        assert!(safe_relative_path("..").is_none());
    }
}

//! Sweep of stale multipart uploads
//!
//! A process that dies mid-upload leaves its multipart upload open on the
//! service, accruing storage for the parts already sent. The sweep lists
//! open uploads page by page and aborts every one initiated before the
//! cutoff.

use std::time::SystemTime;

use orbit_storage_interface::{
    AbortMultipartUploadRequest, ListMultipartUploadsRequest, MultipartUploadSummary,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{cancellable, SharedClient};
use crate::core::{AdmissionGate, FanOut};
use crate::error::Result;
use crate::request::AbortSweepOutcome;

#[instrument(skip_all, fields(bucket = %bucket))]
pub(crate) async fn run(
    client: &SharedClient,
    bucket: &str,
    initiated_before: SystemTime,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<AbortSweepOutcome> {
    let mut fan: FanOut<MultipartUploadSummary> =
        FanOut::new(AdmissionGate::new(concurrency), cancel);
    let mut key_marker = None;
    let mut upload_id_marker = None;

    'pages: loop {
        let listed = cancellable(cancel, async {
            Ok(client
                .list_multipart_uploads(ListMultipartUploadsRequest {
                    bucket: bucket.to_string(),
                    key_marker: key_marker.take(),
                    upload_id_marker: upload_id_marker.take(),
                })
                .await?)
        })
        .await;

        let page = match listed {
            Ok(page) => page,
            Err(err) => {
                fan.settle(None).await;
                return Err(err);
            }
        };

        for upload in page.uploads {
            if !is_stale(&upload, initiated_before) {
                continue;
            }

            let client = client.clone();
            let bucket = bucket.to_string();
            let accepted = fan
                .spawn(async move {
                    client
                        .abort_multipart_upload(AbortMultipartUploadRequest {
                            bucket,
                            key: upload.key.clone(),
                            upload_id: upload.upload_id.clone(),
                        })
                        .await?;
                    debug!(key = %upload.key, upload_id = %upload.upload_id, "Aborted stale upload");
                    Ok(upload)
                })
                .await;
            if !accepted {
                break 'pages;
            }
        }

        if !page.is_truncated {
            break;
        }
        key_marker = page.next_key_marker;
        upload_id_marker = page.next_upload_id_marker;
    }

    let aborted = fan.join_settled().await?;
    info!(aborted = aborted.len(), "Swept stale multipart uploads");
    Ok(AbortSweepOutcome { aborted })
}

/// Uploads without an initiation time are never considered stale
fn is_stale(upload: &MultipartUploadSummary, initiated_before: SystemTime) -> bool {
    upload
        .initiated
        .is_some_and(|initiated| initiated < initiated_before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary(initiated: Option<SystemTime>) -> MultipartUploadSummary {
        MultipartUploadSummary {
            key: "k".to_string(),
            upload_id: "u".to_string(),
            initiated,
        }
    }

    #[test]
    fn test_staleness_cutoff_is_exclusive() {
        let cutoff = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(is_stale(&summary(Some(cutoff - Duration::from_secs(1))), cutoff));
        assert!(!is_stale(&summary(Some(cutoff)), cutoff));
        assert!(!is_stale(&summary(None), cutoff));
    }
}

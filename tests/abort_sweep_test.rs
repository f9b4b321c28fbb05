use std::sync::Arc;
use std::time::{Duration, SystemTime};

use orbit_transfer::testing::InMemoryStorage;
use orbit_transfer::{StorageError, TransferConfig, TransferError, TransferManager};
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "sweep";

fn setup() -> (Arc<InMemoryStorage>, TransferManager) {
    let storage = Arc::new(InMemoryStorage::new());
    storage.create_bucket(BUCKET);
    let config = TransferConfig {
        concurrent_service_requests: 3,
        ..Default::default()
    };
    let manager = TransferManager::new(storage.clone(), config).unwrap();
    (storage, manager)
}

#[tokio::test]
async fn test_sweep_aborts_only_uploads_before_cutoff_across_pages() {
    let (storage, manager) = setup();
    storage.set_page_size(2);
    let now = SystemTime::now();
    let week_ago = now - Duration::from_secs(7 * 24 * 3600);

    let mut stale = Vec::new();
    for i in 0..5 {
        stale.push(storage.insert_upload(BUCKET, &format!("old/{}", i), week_ago));
    }
    let fresh = storage.insert_upload(BUCKET, "new/0", now);
    storage.insert_upload("other-bucket", "old/x", week_ago);

    let cutoff = now - Duration::from_secs(24 * 3600);
    let outcome = manager
        .abort_multipart_uploads(BUCKET, cutoff, &CancellationToken::new())
        .await
        .unwrap();

    let mut aborted: Vec<String> = outcome
        .aborted
        .iter()
        .map(|upload| upload.upload_id.clone())
        .collect();
    aborted.sort();
    assert_eq!(aborted, stale);

    let open = storage.open_uploads(BUCKET);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].upload_id, fresh);
    assert_eq!(storage.open_uploads("other-bucket").len(), 1);
}

#[tokio::test]
async fn test_sweep_with_nothing_stale() {
    let (storage, manager) = setup();
    storage.insert_upload(BUCKET, "recent", SystemTime::now());

    let outcome = manager
        .abort_multipart_uploads(
            BUCKET,
            SystemTime::UNIX_EPOCH,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.aborted.is_empty());
    assert!(storage.aborted_uploads().is_empty());
}

#[tokio::test]
async fn test_sweep_reports_abort_failure() {
    let (storage, manager) = setup();
    storage.fail_aborts();
    storage.insert_upload(BUCKET, "old", SystemTime::UNIX_EPOCH + Duration::from_secs(1));

    let err = manager
        .abort_multipart_uploads(BUCKET, SystemTime::now(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Storage(StorageError::Service { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_sweep_requires_bucket() {
    let (storage, manager) = setup();

    let err = manager
        .abort_multipart_uploads(" ", SystemTime::now(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::InvalidRequest { field: "bucket", .. }));
    assert_eq!(storage.request_count(), 0);
}

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use orbit_transfer::testing::InMemoryStorage;
use orbit_transfer::{
    DirectoryProgress, DownloadDirectoryRequest, ProgressEvent, ProgressReporter, StorageError,
    TransferConfig, TransferError, TransferManager, UploadDirectoryRequest, MIN_PART_SIZE,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "tree";

fn setup() -> (Arc<InMemoryStorage>, TransferManager) {
    let storage = Arc::new(InMemoryStorage::new());
    storage.create_bucket(BUCKET);
    let config = TransferConfig {
        min_size_before_part_upload: MIN_PART_SIZE,
        ..Default::default()
    };
    let manager = TransferManager::new(storage.clone(), config).unwrap();
    (storage, manager)
}

fn write(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn sample_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", b"alpha");
    write(dir.path(), "b.log", b"bravo bravo");
    write(dir.path(), "sub/c.txt", b"charlie");
    write(dir.path(), "sub/deeper/d.txt", b"delta delta delta");
    dir
}

#[tokio::test]
async fn test_flat_upload_skips_subdirectories() {
    let (storage, manager) = setup();
    let dir = sample_tree();

    let outcome = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 2);
    assert_eq!(outcome.bytes, 16);
    assert_eq!(storage.keys(BUCKET), vec!["a.txt", "b.log"]);
}

#[tokio::test]
async fn test_recursive_upload_with_prefix_and_pattern() {
    let (storage, manager) = setup();
    let dir = sample_tree();

    let outcome = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path())
                .with_key_prefix("/backups\\daily")
                .with_search_pattern("*.txt")
                .recursive(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 3);
    assert_eq!(
        storage.keys(BUCKET),
        vec![
            "backups/daily/a.txt",
            "backups/daily/sub/c.txt",
            "backups/daily/sub/deeper/d.txt",
        ]
    );
    assert_eq!(
        storage.object(BUCKET, "backups/daily/sub/c.txt").unwrap(),
        b"charlie"
    );
}

#[tokio::test]
async fn test_interceptor_adjusts_each_file_request() {
    let (storage, manager) = setup();
    let dir = sample_tree();

    manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path())
                .recursive(true)
                .with_interceptor(|request| {
                    request.options.storage_class = Some("GLACIER".to_string());
                }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    for key in storage.keys(BUCKET) {
        let options = storage.object_options(BUCKET, &key).unwrap();
        assert_eq!(options.storage_class.as_deref(), Some("GLACIER"), "{}", key);
    }
}

#[tokio::test]
async fn test_serial_directory_progress_counts_files_and_bytes() {
    let (_storage, manager) = setup();
    let dir = sample_tree();
    let (reporter, mut events) = ProgressReporter::new();

    let outcome = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path())
                .recursive(true)
                .with_progress(reporter),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut directory = Vec::new();
    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::Directory(progress) => directory.push(progress),
            ProgressEvent::FileCompleted { key, .. } => completed.push(key),
            ProgressEvent::Transfer(_) => {}
        }
    }

    assert_eq!(completed.len(), 4);
    assert!(!directory.is_empty());
    assert!(directory.iter().all(|p| p.total_files == 4));
    assert!(directory.iter().all(|p| p.total_bytes == outcome.bytes));
    assert!(directory
        .windows(2)
        .all(|pair| pair[0].transferred <= pair[1].transferred));

    let last = directory.last().unwrap();
    assert_eq!(last.files_done, 4);
    assert_eq!(last.transferred, outcome.bytes);
    // Serial transfers name the file in flight
    assert!(last.current.is_some());
}

fn drain_directory_events(
    events: &mut UnboundedReceiver<ProgressEvent>,
) -> (Vec<DirectoryProgress>, usize) {
    let mut directory = Vec::new();
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::Directory(progress) => directory.push(progress),
            ProgressEvent::FileCompleted { .. } => completed += 1,
            ProgressEvent::Transfer(_) => {}
        }
    }
    (directory, completed)
}

#[tokio::test]
async fn test_concurrent_upload_progress_omits_current_file() {
    let (_storage, manager) = setup();
    let dir = sample_tree();
    let (reporter, mut events) = ProgressReporter::new();

    let outcome = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path())
                .recursive(true)
                .concurrent(true)
                .with_concurrency(3)
                .with_progress(reporter),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let (directory, completed) = drain_directory_events(&mut events);
    assert_eq!(completed, 4);
    assert!(!directory.is_empty());
    assert!(directory.iter().all(|p| p.current.is_none()));

    let last = directory.last().unwrap();
    assert_eq!(last.files_done, 4);
    assert_eq!(last.total_files, 4);
    assert_eq!(last.transferred, outcome.bytes);
    assert_eq!(last.transferred, last.total_bytes);
}

#[tokio::test]
async fn test_concurrent_download_progress_omits_current_file() {
    let (storage, manager) = setup();
    for i in 0..6u8 {
        storage.put_bytes(BUCKET, &format!("batch/{}.bin", i), vec![i; 100 + i as usize]);
    }
    let dest = TempDir::new().unwrap();
    let (reporter, mut events) = ProgressReporter::new();

    let outcome = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "batch", dest.path())
                .concurrent(true)
                .with_progress(reporter),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let (directory, completed) = drain_directory_events(&mut events);
    assert_eq!(outcome.objects, 6);
    assert_eq!(completed, 6);
    assert!(directory.iter().all(|p| p.current.is_none()));

    let last = directory.last().unwrap();
    assert_eq!(last.files_done, 6);
    assert_eq!(last.total_bytes, outcome.bytes);
    assert_eq!(last.transferred, last.total_bytes);
}

#[tokio::test]
async fn test_concurrent_directory_shares_network_gate() {
    let (storage, manager) = setup();
    storage.set_part_delay(Duration::from_millis(50));
    let dir = TempDir::new().unwrap();
    let big = vec![7u8; (2 * MIN_PART_SIZE + 1) as usize];
    for name in ["one.bin", "two.bin", "three.bin"] {
        write(dir.path(), name, &big);
    }

    let outcome = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path())
                .concurrent(true)
                .with_concurrency(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 3);
    assert_eq!(storage.part_calls().len(), 9);
    assert!(storage.peak_concurrent_part_uploads() <= 2);
    assert_eq!(storage.completed_uploads().len(), 3);
}

#[tokio::test]
async fn test_directory_upload_failure_aborts_and_propagates() {
    let (storage, manager) = setup();
    storage.fail_part_upload(2);
    let dir = TempDir::new().unwrap();
    write(dir.path(), "big.bin", &vec![1u8; (2 * MIN_PART_SIZE) as usize]);
    write(dir.path(), "small.txt", b"small");

    let err = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Storage(StorageError::Service { status: 500, .. })
    ));
    assert_eq!(storage.aborted_uploads().len(), 1);
    assert!(storage.open_uploads(BUCKET).is_empty());
}

#[tokio::test]
async fn test_missing_directory_rejected_before_any_call() {
    let (storage, manager) = setup();
    let dir = TempDir::new().unwrap();

    let err = manager
        .upload_directory(
            UploadDirectoryRequest::new(BUCKET, dir.path().join("absent")),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::SourceNotFound(_) | TransferError::InvalidRequest { .. }
    ));
    assert_eq!(storage.request_count(), 0);
}

#[tokio::test]
async fn test_download_directory_rebuilds_tree() {
    let (storage, manager) = setup();
    storage.put_bytes(BUCKET, "photos/2024/a.jpg", b"aaaa".to_vec());
    storage.put_bytes(BUCKET, "photos/2024/trip/b.jpg", b"bbbbbb".to_vec());
    storage.put_bytes(BUCKET, "photos/empty/", Vec::new());
    storage.put_bytes(BUCKET, "photos/", Vec::new());
    storage.put_bytes(BUCKET, "photoshop/skip.psd", b"x".to_vec());
    let dest = TempDir::new().unwrap();

    let outcome = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "photos", dest.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 2);
    assert_eq!(outcome.bytes, 10);
    assert_eq!(outcome.directories_created, 1);
    assert_eq!(fs::read(dest.path().join("2024/a.jpg")).unwrap(), b"aaaa");
    assert_eq!(fs::read(dest.path().join("2024/trip/b.jpg")).unwrap(), b"bbbbbb");
    assert!(dest.path().join("empty").is_dir());
    assert!(!dest.path().join("skip.psd").exists());
}

#[tokio::test]
async fn test_download_directory_falls_back_to_legacy_listing() {
    let (storage, manager) = setup();
    storage.disable_list_v2();
    storage.set_page_size(2);
    for i in 0..5 {
        storage.put_bytes(BUCKET, &format!("logs/{}.log", i), vec![i as u8; 10]);
    }
    let dest = TempDir::new().unwrap();

    let outcome = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "logs/", dest.path()).concurrent(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 5);
    for i in 0..5 {
        assert_eq!(
            fs::read(dest.path().join(format!("{}.log", i))).unwrap(),
            vec![i as u8; 10]
        );
    }
}

#[tokio::test]
async fn test_download_directory_time_filters() {
    let (storage, manager) = setup();
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for (key, offset) in [("t/old", 0u64), ("t/edge", 100), ("t/new", 200)] {
        storage.put_bytes(BUCKET, key, b"x".to_vec());
        storage.set_last_modified(BUCKET, key, base + Duration::from_secs(offset));
    }

    let dest = TempDir::new().unwrap();
    let mut request = DownloadDirectoryRequest::new(BUCKET, "t", dest.path());
    request.modified_since = Some(base + Duration::from_secs(100));
    let outcome = manager
        .download_directory(request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.objects, 1);
    assert!(dest.path().join("new").exists());

    let dest = TempDir::new().unwrap();
    let mut request = DownloadDirectoryRequest::new(BUCKET, "t", dest.path());
    request.unmodified_since = Some(base + Duration::from_secs(100));
    let outcome = manager
        .download_directory(request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.objects, 2);
    assert!(dest.path().join("old").exists());
    assert!(dest.path().join("edge").exists());
}

#[tokio::test]
async fn test_encrypting_client_skips_instruction_files() {
    let (storage, manager) = setup();
    storage.set_encrypting(true);
    storage.put_bytes(BUCKET, "docs/a.txt", b"ciphertext".to_vec());
    storage.put_bytes(BUCKET, "docs/a.txt.instruction", b"{}".to_vec());
    let dest = TempDir::new().unwrap();

    let outcome = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "docs", dest.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.objects, 1);
    assert!(dest.path().join("a.txt").exists());
    assert!(!dest.path().join("a.txt.instruction").exists());
}

#[tokio::test]
async fn test_escaping_key_rejected_before_any_download() {
    let (storage, manager) = setup();
    storage.put_bytes(BUCKET, "in/a.txt", b"fine".to_vec());
    storage.put_bytes(BUCKET, "in/../../evil.txt", b"nope".to_vec());
    let dest = TempDir::new().unwrap();

    let err = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "in", dest.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::InvalidRequest { field: "key", .. }));
    assert!(storage.get_ranges().is_empty());
    assert!(!dest.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_download_directory_failure_propagates() {
    let (storage, manager) = setup();
    storage.put_bytes(BUCKET, "f/1", b"one".to_vec());
    storage.fail_reads(1, orbit_storage_interface::TransportErrorKind::Timeout);
    let dest = TempDir::new().unwrap();

    let err = manager
        .download_directory(
            DownloadDirectoryRequest::new(BUCKET, "f", dest.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Storage(StorageError::Transport { .. })));
}

/*!
 * Transfer manager
 *
 * The public facade over the transfer commands. A manager owns a shared
 * storage client and a validated [`TransferConfig`]; every operation
 * validates its request before the first service call and takes the
 * caller's cancellation token.
 *
 * # Example
 *
 * ```no_run
 * use std::sync::Arc;
 * use orbit_transfer::testing::InMemoryStorage;
 * use orbit_transfer::{TransferConfig, TransferManager, UploadRequest};
 * use tokio_util::sync::CancellationToken;
 *
 * # async fn run() -> orbit_transfer::Result<()> {
 * let storage = Arc::new(InMemoryStorage::new());
 * storage.create_bucket("backups");
 *
 * let manager = TransferManager::new(storage, TransferConfig::default())?;
 * let outcome = manager
 *     .upload(
 *         UploadRequest::from_file("backups", "/var/log/syslog"),
 *         &CancellationToken::new(),
 *     )
 *     .await?;
 * println!("uploaded {} in {} parts", outcome.key, outcome.part_count);
 * # Ok(())
 * # }
 * ```
 */

use std::sync::Arc;
use std::time::SystemTime;

use orbit_storage_interface::{GetObjectOutput, ObjectStorageClient};
use tokio_util::sync::CancellationToken;

use crate::commands::download::DownloadJob;
use crate::commands::{
    abort_stale, download, download_directory, open_stream, prepare_upload, run_upload,
    upload_directory, SharedClient,
};
use crate::config::TransferConfig;
use crate::core::progress::reporter_sink;
use crate::core::ProgressAggregator;
use crate::error::{Result, TransferError};
use crate::request::{
    AbortSweepOutcome, DirectoryOutcome, DownloadDirectoryRequest, DownloadOutcome,
    DownloadRequest, OpenStreamRequest, UploadDirectoryRequest, UploadOutcome, UploadRequest,
};

/// Entry point for uploads, downloads and directory transfers
#[derive(Clone)]
pub struct TransferManager {
    client: SharedClient,
    config: Arc<TransferConfig>,
}

impl TransferManager {
    /// Create a manager over `client`
    ///
    /// Fails when `config` does not validate.
    pub fn new<C>(client: Arc<C>, config: TransferConfig) -> Result<Self>
    where
        C: ObjectStorageClient,
    {
        config.validate()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Create a manager over an already type-erased client
    pub fn from_shared(client: Arc<dyn ObjectStorageClient>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload one file or stream
    ///
    /// Sources below the configured threshold go up in one request; larger
    /// or unknown-length sources use a multipart upload.
    pub async fn upload(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let prepared = prepare_upload(request, &self.config, None).await?;
        run_upload(&self.client, &self.config, prepared, None, cancel).await
    }

    /// Download one object to a local file, resuming across transient failures
    pub async fn download(
        &self,
        request: DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        request.validate()?;
        let DownloadRequest {
            bucket,
            key,
            destination,
            version_id,
            sse_customer,
            progress,
        } = request;

        let progress = Arc::new(ProgressAggregator::new(
            key.clone(),
            Some(destination.clone()),
            None,
            self.config.progress_interval,
            progress.map(reporter_sink),
        ));
        let job = DownloadJob {
            bucket,
            key,
            destination,
            version_id,
            sse_customer,
            progress,
            max_retries: self.max_retries(),
        };
        download::run(&self.client, job, cancel).await
    }

    /// Open an object for streaming reads
    pub async fn open_stream(
        &self,
        request: OpenStreamRequest,
        cancel: &CancellationToken,
    ) -> Result<GetObjectOutput> {
        request.validate()?;
        open_stream::run(&self.client, request, cancel).await
    }

    /// Upload the files of a local directory
    pub async fn upload_directory(
        &self,
        request: UploadDirectoryRequest,
        cancel: &CancellationToken,
    ) -> Result<DirectoryOutcome> {
        request.validate()?;
        upload_directory::run(&self.client, &self.config, request, cancel).await
    }

    /// Download every object under a key prefix
    pub async fn download_directory(
        &self,
        request: DownloadDirectoryRequest,
        cancel: &CancellationToken,
    ) -> Result<DirectoryOutcome> {
        request.validate()?;
        download_directory::run(
            &self.client,
            &self.config,
            request,
            self.max_retries(),
            cancel,
        )
        .await
    }

    /// Abort every open multipart upload in `bucket` initiated before the cutoff
    pub async fn abort_multipart_uploads(
        &self,
        bucket: &str,
        initiated_before: SystemTime,
        cancel: &CancellationToken,
    ) -> Result<AbortSweepOutcome> {
        if bucket.trim().is_empty() {
            return Err(TransferError::invalid("bucket", "is required"));
        }
        abort_stale::run(
            &self.client,
            bucket,
            initiated_before,
            self.config.concurrent_service_requests,
            cancel,
        )
        .await
    }

    fn max_retries(&self) -> u32 {
        self.config
            .max_retries
            .unwrap_or_else(|| self.client.max_retries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStorage;

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransferConfig {
            concurrent_service_requests: 0,
            ..Default::default()
        };
        let result = TransferManager::new(Arc::new(InMemoryStorage::new()), config);
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[test]
    fn test_retry_budget_prefers_config() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = TransferManager::new(storage.clone(), TransferConfig::default()).unwrap();
        assert_eq!(manager.max_retries(), storage.max_retries());

        let config = TransferConfig {
            max_retries: Some(1),
            ..Default::default()
        };
        let manager = TransferManager::new(storage, config).unwrap();
        assert_eq!(manager.max_retries(), 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = TransferManager::new(storage.clone(), TransferConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        let err = manager
            .download(DownloadRequest::new("", "k", "/tmp/out"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { field: "bucket", .. }));

        let err = manager
            .abort_multipart_uploads(" ", SystemTime::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { field: "bucket", .. }));
        assert_eq!(storage.request_count(), 0);
    }
}

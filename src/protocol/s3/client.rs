//! S3 client implementation

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{
    ChecksumAlgorithm as AwsChecksumAlgorithm, CompletedMultipartUpload,
    CompletedPart as AwsCompletedPart, ObjectCannedAcl, ObjectLockLegalHoldStatus,
    ObjectLockMode, ServerSideEncryption as AwsServerSideEncryption, StorageClass,
};
use aws_sdk_s3::Client as AwsS3Client;
use orbit_storage_interface::{
    AbortMultipartUploadRequest, BoxedReader, ChecksumAlgorithm, CompleteMultipartUploadOutput,
    CompleteMultipartUploadRequest, DeleteObjectRequest, GetObjectMetadataRequest,
    GetObjectOutput, GetObjectRequest, InitiateMultipartUploadOutput,
    InitiateMultipartUploadRequest, ListMultipartUploadsOutput, ListMultipartUploadsRequest,
    ListObjectsOutput, ListObjectsRequest, MultipartUploadSummary, ObjectMetadata,
    ObjectOptions, ObjectStorageClient, ObjectSummary, PutObjectOutput, PutObjectRequest,
    ServerSideEncryption, StorageError, Tag, UploadPartOutput, UploadPartRequest,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::config::S3ClientConfig;
use super::error::map_sdk_error;
use crate::error::Result;

type StorageResult<T> = std::result::Result<T, StorageError>;

/// [`ObjectStorageClient`] for AWS S3 and S3-compatible services
///
/// Request bodies are buffered before sending; the engine bounds them by
/// the part size or the multipart threshold.
#[derive(Clone)]
pub struct S3Client {
    client: AwsS3Client,
    config: S3ClientConfig,
}

impl S3Client {
    /// Create a new S3 client with the given configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use orbit_transfer::protocol::s3::{S3Client, S3ClientConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = S3ClientConfig {
    ///         region: Some("us-east-1".to_string()),
    ///         ..Default::default()
    ///     };
    ///     let client = S3Client::new(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: S3ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Self::build_aws_client(&config).await;
        Ok(Self { client, config })
    }

    /// Build the AWS SDK S3 client from configuration
    async fn build_aws_client(config: &S3ClientConfig) -> AwsS3Client {
        let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = if let Some(region_str) = &config.region {
            RegionProviderChain::first_try(Region::new(region_str.clone()))
        } else {
            RegionProviderChain::default_provider()
        };
        aws_config_loader = aws_config_loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "orbit-transfer-explicit",
            );
            aws_config_loader = aws_config_loader.credentials_provider(credentials);
        }

        let aws_config = aws_config_loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        // Required for MinIO, LocalStack
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        s3_config_builder = s3_config_builder
            .timeout_config(timeout_config)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_retries + 1));

        AwsS3Client::from_conf(s3_config_builder.build())
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &S3ClientConfig {
        &self.config
    }

    /// Get a reference to the underlying AWS S3 client
    pub fn aws_client(&self) -> &AwsS3Client {
        &self.client
    }
}

/// Apply creation-time options to a PutObject or CreateMultipartUpload builder
macro_rules! with_object_options {
    ($builder:expr, $options:expr) => {{
        let options: &ObjectOptions = $options;
        let mut builder = $builder
            .set_content_type(options.content_type.clone())
            .set_acl(options.acl.as_deref().map(ObjectCannedAcl::from))
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .set_checksum_algorithm(options.checksum_algorithm.map(to_aws_checksum))
            .set_tagging(encode_tags(&options.tags));

        if !options.metadata.is_empty() {
            let metadata: HashMap<String, String> = options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            builder = builder.set_metadata(Some(metadata));
        }

        match &options.encryption {
            Some(ServerSideEncryption::S3Managed) => {
                builder = builder.server_side_encryption(AwsServerSideEncryption::Aes256);
            }
            Some(ServerSideEncryption::Kms { key_id }) => {
                builder = builder
                    .server_side_encryption(AwsServerSideEncryption::AwsKms)
                    .set_ssekms_key_id(key_id.clone());
            }
            Some(ServerSideEncryption::CustomerProvided(key)) => {
                builder = builder
                    .sse_customer_algorithm(key.algorithm.clone())
                    .sse_customer_key(key.key.clone())
                    .set_sse_customer_key_md5(key.key_md5.clone());
            }
            None => {}
        }

        if let Some(lock) = &options.object_lock {
            builder = builder
                .set_object_lock_mode(lock.mode.as_deref().map(ObjectLockMode::from))
                .set_object_lock_retain_until_date(lock.retain_until.map(DateTime::from));
            if lock.legal_hold {
                builder = builder.object_lock_legal_hold_status(ObjectLockLegalHoldStatus::On);
            }
        }

        builder
    }};
}

/// Attach an SSE-C key to any builder that accepts one
macro_rules! with_customer_key {
    ($builder:expr, $key:expr) => {{
        match $key {
            Some(key) => $builder
                .sse_customer_algorithm(key.algorithm.clone())
                .sse_customer_key(key.key.clone())
                .set_sse_customer_key_md5(key.key_md5.clone()),
            None => $builder,
        }
    }};
}

#[async_trait]
impl ObjectStorageClient for S3Client {
    async fn put_object(&self, request: PutObjectRequest) -> StorageResult<PutObjectOutput> {
        let body = read_body(request.body, request.content_length).await?;
        let builder = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_length(to_i64(request.content_length))
            .body(ByteStream::from(body));

        let response = with_object_options!(builder, &request.options)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(PutObjectOutput {
            etag: response.e_tag().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }

    async fn get_object(&self, request: GetObjectRequest) -> StorageResult<GetObjectOutput> {
        let builder = self
            .client
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_range(request.range.map(|range| range.to_header()))
            .set_version_id(request.version_id.clone());

        let response = with_customer_key!(builder, &request.sse_customer)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let content_length = response.content_length().and_then(|n| u64::try_from(n).ok());
        let object_size = response
            .content_range()
            .and_then(total_from_content_range)
            .or(if request.range.is_none() {
                content_length
            } else {
                None
            });
        let etag = response.e_tag().map(str::to_string);
        let last_modified = response.last_modified().and_then(to_system_time);
        let content_type = response.content_type().map(str::to_string);
        let body: BoxedReader = Box::new(response.body.into_async_read());

        Ok(GetObjectOutput {
            etag,
            content_length,
            object_size,
            last_modified,
            content_type,
            body,
        })
    }

    async fn get_object_metadata(
        &self,
        request: GetObjectMetadataRequest,
    ) -> StorageResult<ObjectMetadata> {
        let builder = self
            .client
            .head_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_version_id(request.version_id.clone());

        let response = with_customer_key!(builder, &request.sse_customer)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(ObjectMetadata {
            size: response
                .content_length()
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0),
            etag: response.e_tag().map(str::to_string),
            last_modified: response.last_modified().and_then(to_system_time),
            content_type: response.content_type().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }

    async fn delete_object(&self, request: DeleteObjectRequest) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> StorageResult<InitiateMultipartUploadOutput> {
        let builder = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key);

        let response = with_object_options!(builder, &request.options)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StorageError::Other("No upload ID returned".to_string()))?
            .to_string();
        debug!(key = %request.key, upload_id = %upload_id, "Created multipart upload");
        Ok(InitiateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, request: UploadPartRequest) -> StorageResult<UploadPartOutput> {
        let body = read_body(request.body, request.content_length).await?;
        let builder = self
            .client
            .upload_part()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .part_number(request.part_number)
            .content_length(to_i64(request.content_length))
            .set_checksum_algorithm(request.checksum_algorithm.map(to_aws_checksum))
            .body(ByteStream::from(body));

        let response = with_customer_key!(builder, &request.sse_customer)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let etag = response
            .e_tag()
            .ok_or_else(|| StorageError::Other("No ETag returned for part".to_string()))?
            .to_string();
        let checksum = match request.checksum_algorithm {
            Some(ChecksumAlgorithm::Crc32) => response.checksum_crc32(),
            Some(ChecksumAlgorithm::Crc32c) => response.checksum_crc32_c(),
            Some(ChecksumAlgorithm::Sha1) => response.checksum_sha1(),
            Some(ChecksumAlgorithm::Sha256) => response.checksum_sha256(),
            None => None,
        }
        .map(str::to_string);

        Ok(UploadPartOutput { etag, checksum })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StorageResult<CompleteMultipartUploadOutput> {
        let parts: Vec<AwsCompletedPart> = request
            .parts
            .iter()
            .map(|part| {
                let builder = AwsCompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag);
                match (request.checksum_algorithm, part.checksum.clone()) {
                    (Some(ChecksumAlgorithm::Crc32), Some(sum)) => builder.checksum_crc32(sum),
                    (Some(ChecksumAlgorithm::Crc32c), Some(sum)) => builder.checksum_crc32_c(sum),
                    (Some(ChecksumAlgorithm::Sha1), Some(sum)) => builder.checksum_sha1(sum),
                    (Some(ChecksumAlgorithm::Sha256), Some(sum)) => builder.checksum_sha256(sum),
                    _ => builder,
                }
                .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let builder = self
            .client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .multipart_upload(multipart_upload);

        let response = with_customer_key!(builder, &request.sse_customer)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(CompleteMultipartUploadOutput {
            etag: response.e_tag().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
            location: response.location().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> StorageResult<ListMultipartUploadsOutput> {
        let response = self
            .client
            .list_multipart_uploads()
            .bucket(&request.bucket)
            .set_key_marker(request.key_marker)
            .set_upload_id_marker(request.upload_id_marker)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let uploads = response
            .uploads()
            .iter()
            .filter_map(|upload| {
                Some(MultipartUploadSummary {
                    key: upload.key()?.to_string(),
                    upload_id: upload.upload_id()?.to_string(),
                    initiated: upload.initiated().and_then(to_system_time),
                })
            })
            .collect();

        Ok(ListMultipartUploadsOutput {
            uploads,
            is_truncated: response.is_truncated().unwrap_or(false),
            next_key_marker: response.next_key_marker().map(str::to_string),
            next_upload_id_marker: response.next_upload_id_marker().map(str::to_string),
        })
    }

    async fn list_objects_v2(&self, request: ListObjectsRequest) -> StorageResult<ListObjectsOutput> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .set_prefix(request.prefix)
            .set_continuation_token(request.continuation_token)
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let next_continuation_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListObjectsOutput {
            objects: response.contents().iter().filter_map(to_summary).collect(),
            next_continuation_token,
        })
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> StorageResult<ListObjectsOutput> {
        let response = self
            .client
            .list_objects()
            .bucket(&request.bucket)
            .set_prefix(request.prefix)
            .set_marker(request.continuation_token)
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects: Vec<ObjectSummary> =
            response.contents().iter().filter_map(to_summary).collect();

        // Without a delimiter the service may omit NextMarker; the last key continues the listing
        let next_continuation_token = if response.is_truncated().unwrap_or(false) {
            response
                .next_marker()
                .map(str::to_string)
                .or_else(|| objects.last().map(|object| object.key.clone()))
        } else {
            None
        };

        Ok(ListObjectsOutput {
            objects,
            next_continuation_token,
        })
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

async fn read_body(mut body: BoxedReader, content_length: u64) -> StorageResult<Vec<u8>> {
    let capacity = usize::try_from(content_length).unwrap_or(0);
    let mut buffer = Vec::with_capacity(capacity);
    body.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

fn to_aws_checksum(algorithm: ChecksumAlgorithm) -> AwsChecksumAlgorithm {
    match algorithm {
        ChecksumAlgorithm::Crc32 => AwsChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Crc32c => AwsChecksumAlgorithm::Crc32C,
        ChecksumAlgorithm::Sha1 => AwsChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256 => AwsChecksumAlgorithm::Sha256,
    }
}

fn to_summary(object: &aws_sdk_s3::types::Object) -> Option<ObjectSummary> {
    Some(ObjectSummary {
        key: object.key()?.to_string(),
        size: object.size().and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
        etag: object.e_tag().map(str::to_string),
        last_modified: object.last_modified().and_then(to_system_time),
    })
}

fn to_system_time(time: &DateTime) -> Option<SystemTime> {
    SystemTime::try_from(*time).ok()
}

fn to_i64(length: u64) -> i64 {
    i64::try_from(length).unwrap_or(i64::MAX)
}

/// `x-amz-tagging` value: URL-encoded `key=value` pairs
pub(crate) fn encode_tags(tags: &[Tag]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for tag in tags {
        serializer.append_pair(&tag.key, &tag.value);
    }
    Some(serializer.finish())
}

/// Total object size from a `Content-Range` value such as `bytes 0-99/100`
pub(crate) fn total_from_content_range(range: &str) -> Option<u64> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_url_encoded() {
        let tags = vec![Tag::new("project", "orbit"), Tag::new("owner", "ops team&co")];
        assert_eq!(
            encode_tags(&tags).as_deref(),
            Some("project=orbit&owner=ops+team%26co")
        );
        assert_eq!(encode_tags(&[]), None);
    }

    #[test]
    fn test_total_from_content_range() {
        assert_eq!(total_from_content_range("bytes 0-99/100"), Some(100));
        assert_eq!(total_from_content_range("bytes 100-199/4096"), Some(4096));
        assert_eq!(total_from_content_range("bytes */*"), None);
        assert_eq!(total_from_content_range("garbage"), None);
    }

    #[test]
    fn test_checksum_mapping() {
        assert_eq!(to_aws_checksum(ChecksumAlgorithm::Crc32c), AwsChecksumAlgorithm::Crc32C);
        assert_eq!(to_aws_checksum(ChecksumAlgorithm::Sha256), AwsChecksumAlgorithm::Sha256);
    }
}

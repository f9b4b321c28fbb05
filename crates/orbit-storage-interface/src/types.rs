//! Request and response types exchanged with an object storage client

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use tokio::io::AsyncRead;

/// Boxed async body used for uploads and downloads
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Checksum algorithms the service can compute for uploaded data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Wire name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => "CRC32",
            ChecksumAlgorithm::Crc32c => "CRC32C",
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Sha256 => "SHA256",
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(ChecksumAlgorithm::Crc32),
            "CRC32C" => Ok(ChecksumAlgorithm::Crc32c),
            "SHA1" => Ok(ChecksumAlgorithm::Sha1),
            "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(format!("unknown checksum algorithm: {}", other)),
        }
    }
}

/// Customer-provided encryption key (SSE-C)
#[derive(Clone, PartialEq, Eq)]
pub struct CustomerKey {
    pub algorithm: String,
    pub key: String,
    pub key_md5: Option<String>,
}

impl fmt::Debug for CustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .field("key_md5", &self.key_md5)
            .finish()
    }
}

/// Server-side encryption requested for a new object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSideEncryption {
    /// Service-managed keys (SSE-S3)
    S3Managed,
    /// KMS-managed keys, optionally naming the key
    Kms { key_id: Option<String> },
    /// Caller supplies the key with every request
    CustomerProvided(CustomerKey),
}

impl ServerSideEncryption {
    /// The SSE-C key, which must accompany every part upload and read
    pub fn customer_key(&self) -> Option<&CustomerKey> {
        match self {
            ServerSideEncryption::CustomerProvided(key) => Some(key),
            _ => None,
        }
    }
}

/// Object lock retention applied at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLock {
    /// `GOVERNANCE` or `COMPLIANCE`
    pub mode: Option<String>,
    pub retain_until: Option<SystemTime>,
    pub legal_hold: bool,
}

/// A single object tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Creation-time attributes shared by single PUTs and multipart initiation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    pub content_type: Option<String>,
    /// Canned ACL such as `private` or `bucket-owner-full-control`
    pub acl: Option<String>,
    pub storage_class: Option<String>,
    pub encryption: Option<ServerSideEncryption>,
    pub tags: Vec<Tag>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub object_lock: Option<ObjectLock>,
    pub metadata: BTreeMap<String, String>,
}

/// Inclusive byte range for ranged reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// `None` reads to the end of the object
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range starting at `start` and running to the end of the object
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// HTTP `Range` header value
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: BoxedReader,
    pub content_length: u64,
    pub options: ObjectOptions,
}

impl fmt::Debug for PutObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjectRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    pub range: Option<ByteRange>,
    pub version_id: Option<String>,
    pub sse_customer: Option<CustomerKey>,
}

pub struct GetObjectOutput {
    pub etag: Option<String>,
    /// Length of this response body
    pub content_length: Option<u64>,
    /// Full object size, when the service reports it
    pub object_size: Option<u64>,
    pub last_modified: Option<SystemTime>,
    pub content_type: Option<String>,
    pub body: BoxedReader,
}

impl fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("etag", &self.etag)
            .field("content_length", &self.content_length)
            .field("object_size", &self.object_size)
            .field("last_modified", &self.last_modified)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct GetObjectMetadataRequest {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub sse_customer: Option<CustomerKey>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
    pub content_type: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub options: ObjectOptions,
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadOutput {
    pub upload_id: String,
}

pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// 1-based part number
    pub part_number: i32,
    pub body: BoxedReader,
    pub content_length: u64,
    pub is_last_part: bool,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub sse_customer: Option<CustomerKey>,
}

impl fmt::Debug for UploadPartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPartRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("upload_id", &self.upload_id)
            .field("part_number", &self.part_number)
            .field("content_length", &self.content_length)
            .field("is_last_part", &self.is_last_part)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UploadPartOutput {
    pub etag: String,
    pub checksum: Option<String>,
}

/// Identity of an uploaded part, as referenced by completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// Sorted by part number
    pub parts: Vec<CompletedPart>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub sse_customer: Option<CustomerKey>,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsRequest {
    pub bucket: String,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
}

/// An open multipart upload
#[derive(Debug, Clone)]
pub struct MultipartUploadSummary {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsOutput {
    pub uploads: Vec<MultipartUploadSummary>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Listing request shared by the v2 and legacy listing calls
///
/// For the legacy call the continuation token is the marker key.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

/// One listed object
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsOutput {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page, `None` when the listing is complete
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectRequest {
    pub bucket: String,
    pub key: String,
}

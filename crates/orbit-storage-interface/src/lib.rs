//! Orbit Storage Interface: the object storage boundary
//!
//! This crate defines the `ObjectStorageClient` trait, the set of storage
//! service calls the Orbit transfer engine is built on. The engine never
//! talks to a wire protocol directly: request signing, HTTP transport and
//! per-request retries belong to whatever implements this trait.
//!
//! # Architecture
//!
//! The trait groups its operations into three families:
//!
//! 1. **Objects**: single PUT, ranged GET, metadata lookup, delete
//! 2. **Multipart**: initiate, upload part, complete, abort, list open uploads
//! 3. **Listing**: paginated `ListObjectsV2` plus the legacy listing call
//!
//! Every call is a future; cancelling a call means dropping its future.
//!
//! # Example
//!
//! ```rust,no_run
//! use orbit_storage_interface::{GetObjectRequest, ObjectStorageClient};
//! use tokio::io::AsyncReadExt;
//!
//! async fn fetch<C: ObjectStorageClient>(client: &C) -> orbit_storage_interface::Result<Vec<u8>> {
//!     let mut response = client
//!         .get_object(GetObjectRequest {
//!             bucket: "my-bucket".to_string(),
//!             key: "reports/q3.csv".to_string(),
//!             range: None,
//!             version_id: None,
//!             sse_customer: None,
//!         })
//!         .await?;
//!
//!     let mut data = Vec::new();
//!     response.body.read_to_end(&mut data).await?;
//!     Ok(data)
//! }
//! ```

mod error;
mod types;

use async_trait::async_trait;
use std::sync::Arc;

pub use error::{Result, StorageError, TransportErrorKind};
pub use types::*;

/// Retry budget assumed when a client does not report its own
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// The storage service calls consumed by the transfer engine
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static`; the engine shares one
/// client across every concurrent part, file and abort it schedules.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync + 'static {
    // ═══════════════════════════════════════════════════════════════════════
    // 1. Object Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Upload an object in a single request
    async fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectOutput>;

    /// Open an object (or a byte range of it) for reading
    ///
    /// The returned body streams from the service; the call resolves once
    /// response headers have arrived.
    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput>;

    /// Fetch object metadata without the body
    async fn get_object_metadata(&self, request: GetObjectMetadataRequest)
        -> Result<ObjectMetadata>;

    /// Delete an object
    async fn delete_object(&self, request: DeleteObjectRequest) -> Result<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Multipart Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a multipart upload and obtain its upload id
    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> Result<InitiateMultipartUploadOutput>;

    /// Upload one part of an open multipart upload
    async fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput>;

    /// Assemble the uploaded parts into the final object
    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompleteMultipartUploadOutput>;

    /// Discard an open multipart upload and its parts
    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> Result<()>;

    /// List open multipart uploads, one page at a time
    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> Result<ListMultipartUploadsOutput>;

    // ═══════════════════════════════════════════════════════════════════════
    // 3. Listing Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Paginated listing (`ListObjectsV2`)
    async fn list_objects_v2(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput>;

    /// Legacy marker-based listing
    async fn list_objects(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput>;

    // ═══════════════════════════════════════════════════════════════════════
    // 4. Client Properties
    // ═══════════════════════════════════════════════════════════════════════

    /// Maximum retries this client is configured for
    ///
    /// The engine reuses this budget for its own resumable download loop.
    fn max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    /// Whether this client encrypts on the client side
    ///
    /// Encrypting clients store instruction-file sidecars next to objects
    /// and cannot share a request throttle across files.
    fn is_encrypting(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: ObjectStorageClient + ?Sized> ObjectStorageClient for Arc<T> {
    async fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectOutput> {
        (**self).put_object(request).await
    }

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput> {
        (**self).get_object(request).await
    }

    async fn get_object_metadata(
        &self,
        request: GetObjectMetadataRequest,
    ) -> Result<ObjectMetadata> {
        (**self).get_object_metadata(request).await
    }

    async fn delete_object(&self, request: DeleteObjectRequest) -> Result<()> {
        (**self).delete_object(request).await
    }

    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> Result<InitiateMultipartUploadOutput> {
        (**self).initiate_multipart_upload(request).await
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput> {
        (**self).upload_part(request).await
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompleteMultipartUploadOutput> {
        (**self).complete_multipart_upload(request).await
    }

    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> Result<()> {
        (**self).abort_multipart_upload(request).await
    }

    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> Result<ListMultipartUploadsOutput> {
        (**self).list_multipart_uploads(request).await
    }

    async fn list_objects_v2(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput> {
        (**self).list_objects_v2(request).await
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput> {
        (**self).list_objects(request).await
    }

    fn max_retries(&self) -> u32 {
        (**self).max_retries()
    }

    fn is_encrypting(&self) -> bool {
        (**self).is_encrypting()
    }
}

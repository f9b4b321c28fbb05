//! In-memory object storage for tests
//!
//! [`InMemoryStorage`] implements [`ObjectStorageClient`] over plain maps so
//! whole transfers can run without a network. It enforces the service rules
//! the engine depends on (minimum part size, part ETags at completion,
//! byte ranges) and carries fault injection for the failure paths:
//! failing parts, interrupted reads, objects replaced mid-download, and
//! endpoints without `ListObjectsV2`.
//!
//! # Example
//!
//! ```rust
//! use orbit_transfer::testing::InMemoryStorage;
//!
//! let storage = InMemoryStorage::new();
//! storage.create_bucket("media");
//! storage.put_bytes("media", "clip.mp4", b"not really a video".to_vec());
//! assert_eq!(storage.object("media", "clip.mp4").unwrap().len(), 18);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use orbit_storage_interface::{
    AbortMultipartUploadRequest, ChecksumAlgorithm, CompleteMultipartUploadOutput,
    CompleteMultipartUploadRequest, DeleteObjectRequest, GetObjectMetadataRequest,
    GetObjectOutput, GetObjectRequest, InitiateMultipartUploadOutput,
    InitiateMultipartUploadRequest, ListMultipartUploadsOutput, ListMultipartUploadsRequest,
    ListObjectsOutput, ListObjectsRequest, MultipartUploadSummary, ObjectMetadata,
    ObjectOptions, ObjectStorageClient, ObjectSummary, PutObjectOutput, PutObjectRequest,
    StorageError, TransportErrorKind, UploadPartOutput, UploadPartRequest, BoxedReader,
    ByteRange, DEFAULT_MAX_RETRIES,
};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::core::MIN_PART_SIZE;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// A stored object
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified: SystemTime,
    options: ObjectOptions,
}

#[derive(Debug)]
struct OpenUpload {
    bucket: String,
    key: String,
    options: ObjectOptions,
    initiated: SystemTime,
    parts: BTreeMap<i32, (Vec<u8>, String)>,
}

/// One `upload_part` call as the service saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCall {
    pub upload_id: String,
    pub part_number: i32,
    pub content_length: u64,
    pub is_last_part: bool,
}

/// Pending read interruption
#[derive(Debug, Clone)]
struct Interruption {
    after_bytes: usize,
    remaining: usize,
    replace_with: Option<Vec<u8>>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: BTreeMap<String, OpenUpload>,
    next_upload: u64,
    part_calls: Vec<PartCall>,
    aborted: Vec<String>,
    completed: Vec<String>,
    get_ranges: Vec<Option<ByteRange>>,
}

#[derive(Default)]
struct Faults {
    failing_parts: HashSet<i32>,
    interruption: Option<Interruption>,
    failing_gets: Option<(usize, TransportErrorKind)>,
    part_delay: Option<Duration>,
    page_size: Option<usize>,
}

/// In-memory [`ObjectStorageClient`]
pub struct InMemoryStorage {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    requests: AtomicUsize,
    parts_in_flight: AtomicUsize,
    peak_parts_in_flight: AtomicUsize,
    list_v2_disabled: AtomicBool,
    abort_fails: AtomicBool,
    encrypting: AtomicBool,
    max_retries: AtomicU32,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            requests: AtomicUsize::new(0),
            parts_in_flight: AtomicUsize::new(0),
            peak_parts_in_flight: AtomicUsize::new(0),
            list_v2_disabled: AtomicBool::new(false),
            abort_fails: AtomicBool::new(false),
            encrypting: AtomicBool::new(false),
            max_retries: AtomicU32::new(DEFAULT_MAX_RETRIES),
        }
    }

    pub fn create_bucket(&self, bucket: &str) {
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object directly, bypassing the request path
    pub fn put_bytes(&self, bucket: &str, key: &str, data: Vec<u8>) {
        let object = StoredObject {
            etag: etag_of(&data),
            data,
            last_modified: SystemTime::now(),
            options: ObjectOptions::default(),
        };
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    pub fn set_last_modified(&self, bucket: &str, key: &str, at: SystemTime) {
        if let Some(object) = lock(&self.state)
            .buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
        {
            object.last_modified = at;
        }
    }

    /// Open a multipart upload as if another process had started it
    pub fn insert_upload(&self, bucket: &str, key: &str, initiated: SystemTime) -> String {
        let mut state = lock(&self.state);
        let upload_id = next_upload_id(&mut state);
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: ObjectOptions::default(),
                initiated,
                parts: BTreeMap::new(),
            },
        );
        upload_id
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.stored(bucket, key).map(|object| object.data)
    }

    pub fn object_options(&self, bucket: &str, key: &str) -> Option<ObjectOptions> {
        self.stored(bucket, key).map(|object| object.options)
    }

    pub fn etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.stored(bucket, key).map(|object| object.etag)
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn part_calls(&self) -> Vec<PartCall> {
        lock(&self.state).part_calls.clone()
    }

    /// Upload ids aborted so far, in order
    pub fn aborted_uploads(&self) -> Vec<String> {
        lock(&self.state).aborted.clone()
    }

    pub fn completed_uploads(&self) -> Vec<String> {
        lock(&self.state).completed.clone()
    }

    pub fn open_uploads(&self, bucket: &str) -> Vec<MultipartUploadSummary> {
        lock(&self.state)
            .uploads
            .iter()
            .filter(|(_, upload)| upload.bucket == bucket)
            .map(|(id, upload)| summary(id, upload))
            .collect()
    }

    /// Byte ranges requested by every `get_object` call
    pub fn get_ranges(&self) -> Vec<Option<ByteRange>> {
        lock(&self.state).get_ranges.clone()
    }

    /// Total calls made through the client trait
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Highest number of part uploads observed in flight at once
    pub fn peak_concurrent_part_uploads(&self) -> usize {
        self.peak_parts_in_flight.load(Ordering::SeqCst)
    }

    // Fault injection

    /// Reject every upload of `part_number` with a service error
    pub fn fail_part_upload(&self, part_number: i32) {
        lock(&self.faults).failing_parts.insert(part_number);
    }

    /// Hold every part upload for `delay` before it is stored
    pub fn set_part_delay(&self, delay: Duration) {
        lock(&self.faults).part_delay = Some(delay);
    }

    /// Cut the next `times` response bodies after `after_bytes` bytes
    pub fn interrupt_reads(&self, after_bytes: usize, times: usize) {
        lock(&self.faults).interruption = Some(Interruption {
            after_bytes,
            remaining: times,
            replace_with: None,
        });
    }

    /// Cut the next response body after `after_bytes`, then replace the object
    pub fn replace_after_interrupted_read(&self, after_bytes: usize, replacement: Vec<u8>) {
        lock(&self.faults).interruption = Some(Interruption {
            after_bytes,
            remaining: 1,
            replace_with: Some(replacement),
        });
    }

    /// Fail the next `times` reads before a response arrives
    pub fn fail_reads(&self, times: usize, kind: TransportErrorKind) {
        lock(&self.faults).failing_gets = Some((times, kind));
    }

    /// Answer `ListObjectsV2` with `NotImplemented`
    pub fn disable_list_v2(&self) {
        self.list_v2_disabled.store(true, Ordering::SeqCst);
    }

    /// Entries per listing page
    pub fn set_page_size(&self, size: usize) {
        lock(&self.faults).page_size = Some(size.max(1));
    }

    pub fn fail_aborts(&self) {
        self.abort_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_encrypting(&self, encrypting: bool) {
        self.encrypting.store(encrypting, Ordering::SeqCst);
    }

    pub fn set_max_retries(&self, retries: u32) {
        self.max_retries.store(retries, Ordering::SeqCst);
    }

    fn stored(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    fn page_size(&self) -> usize {
        lock(&self.faults).page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn store(&self, bucket: &str, key: &str, object: StoredObject) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        objects.insert(key.to_string(), object);
        Ok(())
    }

    fn list(&self, request: &ListObjectsRequest) -> Result<ListObjectsOutput, StorageError> {
        let page_size = request
            .max_keys
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| self.page_size());
        let state = lock(&self.state);
        let objects = state
            .buckets
            .get(&request.bucket)
            .ok_or_else(|| no_such_bucket(&request.bucket))?;
        let prefix = request.prefix.as_deref().unwrap_or_default();

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| {
                request
                    .continuation_token
                    .as_deref()
                    .is_none_or(|after| key.as_str() > after)
            });

        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(page_size)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: Some(object.etag.clone()),
                last_modified: Some(object.last_modified),
            })
            .collect();
        let more = matching.next().is_some();

        Ok(ListObjectsOutput {
            next_continuation_token: if more {
                page.last().map(|object| object.key.clone())
            } else {
                None
            },
            objects: page,
        })
    }

    fn take_get_failure(&self) -> Option<TransportErrorKind> {
        let mut faults = lock(&self.faults);
        let (remaining, kind) = faults.failing_gets.as_mut()?;
        let kind = *kind;
        *remaining -= 1;
        if *remaining == 0 {
            faults.failing_gets = None;
        }
        Some(kind)
    }

    fn take_interruption(&self) -> Option<Interruption> {
        let mut faults = lock(&self.faults);
        let pending = faults.interruption.as_mut()?;
        let current = pending.clone();
        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining == 0 {
            faults.interruption = None;
        }
        Some(current)
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryStorage {
    async fn put_object(&self, mut request: PutObjectRequest) -> Result<PutObjectOutput, StorageError> {
        self.count_request();
        let mut data = Vec::new();
        request.body.read_to_end(&mut data).await?;
        if data.len() as u64 != request.content_length {
            return Err(StorageError::service(
                400,
                "IncompleteBody",
                "body length does not match content length",
            ));
        }

        let etag = etag_of(&data);
        self.store(
            &request.bucket,
            &request.key,
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: SystemTime::now(),
                options: request.options,
            },
        )?;
        Ok(PutObjectOutput {
            etag: Some(etag),
            version_id: None,
        })
    }

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput, StorageError> {
        self.count_request();
        lock(&self.state).get_ranges.push(request.range);

        if let Some(kind) = self.take_get_failure() {
            return Err(StorageError::transport(kind, "injected read failure"));
        }

        let object = self
            .stored(&request.bucket, &request.key)
            .ok_or_else(|| no_such_key(&request.key))?;
        let size = object.data.len() as u64;

        let (start, end) = match request.range {
            None => (0, size),
            Some(range) => {
                if range.start >= size && size > 0 {
                    return Err(StorageError::service(
                        416,
                        "InvalidRange",
                        "the requested range is not satisfiable",
                    ));
                }
                let end = range.end.map_or(size, |end| (end + 1).min(size));
                (range.start.min(size), end)
            }
        };
        let body = object.data[start as usize..end as usize].to_vec();
        let content_length = body.len() as u64;

        let body: BoxedReader = match self.take_interruption() {
            Some(interruption) => {
                if let Some(replacement) = interruption.replace_with {
                    self.put_bytes(&request.bucket, &request.key, replacement);
                }
                let cut = interruption.after_bytes.min(body.len());
                Box::new(InterruptedBody {
                    head: Cursor::new(body[..cut].to_vec()),
                })
            }
            None => Box::new(Cursor::new(body)),
        };

        Ok(GetObjectOutput {
            etag: Some(object.etag),
            content_length: Some(content_length),
            object_size: Some(size),
            last_modified: Some(object.last_modified),
            content_type: object.options.content_type,
            body,
        })
    }

    async fn get_object_metadata(
        &self,
        request: GetObjectMetadataRequest,
    ) -> Result<ObjectMetadata, StorageError> {
        self.count_request();
        let object = self
            .stored(&request.bucket, &request.key)
            .ok_or_else(|| no_such_key(&request.key))?;
        Ok(ObjectMetadata {
            size: object.data.len() as u64,
            etag: Some(object.etag),
            last_modified: Some(object.last_modified),
            content_type: object.options.content_type,
            version_id: None,
        })
    }

    async fn delete_object(&self, request: DeleteObjectRequest) -> Result<(), StorageError> {
        self.count_request();
        if let Some(objects) = lock(&self.state).buckets.get_mut(&request.bucket) {
            objects.remove(&request.key);
        }
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> Result<InitiateMultipartUploadOutput, StorageError> {
        self.count_request();
        let mut state = lock(&self.state);
        if !state.buckets.contains_key(&request.bucket) {
            return Err(no_such_bucket(&request.bucket));
        }
        let upload_id = next_upload_id(&mut state);
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                bucket: request.bucket,
                key: request.key,
                options: request.options,
                initiated: SystemTime::now(),
                parts: BTreeMap::new(),
            },
        );
        Ok(InitiateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, mut request: UploadPartRequest) -> Result<UploadPartOutput, StorageError> {
        self.count_request();
        let _in_flight = InFlight::enter(&self.parts_in_flight, &self.peak_parts_in_flight);

        lock(&self.state).part_calls.push(PartCall {
            upload_id: request.upload_id.clone(),
            part_number: request.part_number,
            content_length: request.content_length,
            is_last_part: request.is_last_part,
        });

        let (delay, fail) = {
            let faults = lock(&self.faults);
            (
                faults.part_delay,
                faults.failing_parts.contains(&request.part_number),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StorageError::service(
                500,
                "InternalError",
                format!("injected failure for part {}", request.part_number),
            ));
        }

        let mut data = Vec::new();
        request.body.read_to_end(&mut data).await?;
        if data.len() as u64 != request.content_length {
            return Err(StorageError::service(
                400,
                "IncompleteBody",
                "part length does not match content length",
            ));
        }

        let etag = etag_of(&data);
        let checksum = match request.checksum_algorithm {
            Some(ChecksumAlgorithm::Sha256) => Some(hex::encode(Sha256::digest(&data))),
            _ => None,
        };

        let mut state = lock(&self.state);
        let upload = state
            .uploads
            .get_mut(&request.upload_id)
            .ok_or_else(|| no_such_upload(&request.upload_id))?;
        upload
            .parts
            .insert(request.part_number, (data, etag.clone()));
        Ok(UploadPartOutput { etag, checksum })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompleteMultipartUploadOutput, StorageError> {
        self.count_request();
        let mut state = lock(&self.state);
        let upload = state
            .uploads
            .get(&request.upload_id)
            .ok_or_else(|| no_such_upload(&request.upload_id))?;

        if request.parts.is_empty() {
            return Err(StorageError::service(
                400,
                "MalformedXML",
                "at least one part is required",
            ));
        }

        let mut data = Vec::new();
        let mut etags = Vec::with_capacity(request.parts.len());
        let last_index = request.parts.len() - 1;
        for (index, part) in request.parts.iter().enumerate() {
            let (bytes, etag) = upload
                .parts
                .get(&part.part_number)
                .filter(|(_, etag)| *etag == part.etag)
                .ok_or_else(|| {
                    StorageError::service(
                        400,
                        "InvalidPart",
                        format!("part {} was not uploaded", part.part_number),
                    )
                })?;
            if index < last_index && (bytes.len() as u64) < MIN_PART_SIZE {
                return Err(StorageError::service(
                    400,
                    "EntityTooSmall",
                    format!("part {} is smaller than the minimum", part.part_number),
                ));
            }
            data.extend_from_slice(bytes);
            etags.push(etag.as_str());
        }

        let etag = format!(
            "{}-{}",
            etag_of(etags.concat().as_bytes()),
            request.parts.len()
        );
        let object = StoredObject {
            data,
            etag: etag.clone(),
            last_modified: SystemTime::now(),
            options: upload.options.clone(),
        };
        let (bucket, key) = (upload.bucket.clone(), upload.key.clone());

        state.uploads.remove(&request.upload_id);
        state.completed.push(request.upload_id);
        state
            .buckets
            .get_mut(&bucket)
            .ok_or_else(|| no_such_bucket(&bucket))?
            .insert(key, object);

        Ok(CompleteMultipartUploadOutput {
            etag: Some(etag),
            version_id: None,
            location: None,
        })
    }

    async fn abort_multipart_upload(
        &self,
        request: AbortMultipartUploadRequest,
    ) -> Result<(), StorageError> {
        self.count_request();
        if self.abort_fails.load(Ordering::SeqCst) {
            return Err(StorageError::service(503, "SlowDown", "injected abort failure"));
        }
        let mut state = lock(&self.state);
        state
            .uploads
            .remove(&request.upload_id)
            .ok_or_else(|| no_such_upload(&request.upload_id))?;
        state.aborted.push(request.upload_id);
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> Result<ListMultipartUploadsOutput, StorageError> {
        self.count_request();
        let page_size = self.page_size();
        let state = lock(&self.state);

        let mut uploads: Vec<MultipartUploadSummary> = state
            .uploads
            .iter()
            .filter(|(_, upload)| upload.bucket == request.bucket)
            .map(|(id, upload)| summary(id, upload))
            .collect();
        uploads.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        let marker = request
            .key_marker
            .map(|key| (key, request.upload_id_marker.unwrap_or_default()));
        let mut remaining = uploads.into_iter().filter(|upload| match &marker {
            Some((key, id)) => (&upload.key, &upload.upload_id) > (key, id),
            None => true,
        });

        let page: Vec<MultipartUploadSummary> = remaining.by_ref().take(page_size).collect();
        let is_truncated = remaining.next().is_some();
        let last = page.last().filter(|_| is_truncated);

        Ok(ListMultipartUploadsOutput {
            next_key_marker: last.map(|upload| upload.key.clone()),
            next_upload_id_marker: last.map(|upload| upload.upload_id.clone()),
            uploads: page,
            is_truncated,
        })
    }

    async fn list_objects_v2(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput, StorageError> {
        self.count_request();
        if self.list_v2_disabled.load(Ordering::SeqCst) {
            return Err(StorageError::service(
                501,
                "NotImplemented",
                "ListObjectsV2 is not supported by this endpoint",
            ));
        }
        self.list(&request)
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> Result<ListObjectsOutput, StorageError> {
        self.count_request();
        self.list(&request)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::SeqCst)
    }

    fn is_encrypting(&self) -> bool {
        self.encrypting.load(Ordering::SeqCst)
    }
}

/// Body that fails with a connection reset once its head is consumed
struct InterruptedBody {
    head: Cursor<Vec<u8>>,
}

impl AsyncRead for InterruptedBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.head).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => Poll::Ready(Err(
                io::Error::new(io::ErrorKind::ConnectionReset, "injected connection reset"),
            )),
            other => other,
        }
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn etag_of(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

fn next_upload_id(state: &mut State) -> String {
    state.next_upload += 1;
    format!("upload-{:06}", state.next_upload)
}

fn summary(upload_id: &str, upload: &OpenUpload) -> MultipartUploadSummary {
    MultipartUploadSummary {
        key: upload.key.clone(),
        upload_id: upload_id.to_string(),
        initiated: Some(upload.initiated),
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    StorageError::service(404, "NoSuchBucket", format!("bucket {} does not exist", bucket))
}

fn no_such_key(key: &str) -> StorageError {
    StorageError::service(404, "NoSuchKey", format!("key {} does not exist", key))
}

fn no_such_upload(upload_id: &str) -> StorageError {
    StorageError::service(404, "NoSuchUpload", format!("upload {} does not exist", upload_id))
}

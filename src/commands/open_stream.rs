//! Streaming reads that bypass the local disk

use orbit_storage_interface::{GetObjectOutput, GetObjectRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{cancellable, SharedClient};
use crate::error::Result;
use crate::request::OpenStreamRequest;

/// Open the object body for reading
///
/// Resolves once the response headers have arrived; the caller owns the
/// body and reads it at its own pace.
#[instrument(skip_all, fields(bucket = %request.bucket, key = %request.key))]
pub(crate) async fn run(
    client: &SharedClient,
    request: OpenStreamRequest,
    cancel: &CancellationToken,
) -> Result<GetObjectOutput> {
    let output = cancellable(cancel, async {
        Ok(client
            .get_object(GetObjectRequest {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                range: None,
                version_id: request.version_id.clone(),
                sse_customer: request.sse_customer.clone(),
            })
            .await?)
    })
    .await?;

    debug!(
        content_length = ?output.content_length,
        etag = ?output.etag,
        "Opened object stream"
    );
    Ok(output)
}

//! Single-request uploads for objects below the multipart threshold

use orbit_storage_interface::{BoxedReader, PutObjectRequest};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{
    acquire_optional, cancellable, read_shared, restore_position, PreparedSource, PreparedUpload,
    SharedClient,
};
use crate::core::{AdmissionGate, ProgressReader};
use crate::error::Result;
use crate::request::UploadOutcome;

/// Upload the whole source with one PUT
///
/// A slot on the shared network gate, when one is given, is held for the
/// duration of the request. A seekable source is put back at its starting
/// position afterwards, whether or not the request succeeded.
#[instrument(skip_all, fields(bucket = %upload.bucket, key = %upload.key))]
pub(crate) async fn run(
    client: &SharedClient,
    upload: PreparedUpload,
    network_gate: Option<AdmissionGate>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let _permit = acquire_optional(network_gate.as_ref(), cancel).await?;

    let PreparedUpload {
        bucket,
        key,
        source,
        options,
        progress,
        ..
    } = upload;

    let length = source.content_length().unwrap_or(0);
    let restore = match &source {
        PreparedSource::Seekable { reader, start, .. } => Some((reader.clone(), *start)),
        _ => None,
    };
    let body: BoxedReader = match source {
        PreparedSource::File { path, length } => {
            let file = tokio::fs::File::open(&path).await?;
            Box::new(ProgressReader::new(file.take(length), progress.clone()))
        }
        PreparedSource::Seekable {
            reader,
            start,
            length,
        } => Box::new(ProgressReader::new(
            read_shared(&reader, start, length).await?,
            progress.clone(),
        )),
        PreparedSource::Stream { reader, .. } => {
            Box::new(ProgressReader::new(reader.take(length), progress.clone()))
        }
    };

    let result = cancellable(cancel, async {
        Ok(client
            .put_object(PutObjectRequest {
                bucket: bucket.clone(),
                key: key.clone(),
                body,
                content_length: length,
                options,
            })
            .await?)
    })
    .await;
    if let Some((reader, start)) = restore {
        restore_position(&reader, start).await;
    }
    let output = result?;

    progress.finish();
    info!(bytes = length, etag = ?output.etag, "Uploaded object");

    Ok(UploadOutcome {
        bucket,
        key,
        etag: output.etag,
        version_id: output.version_id,
        upload_id: None,
        part_count: 1,
        bytes: length,
    })
}

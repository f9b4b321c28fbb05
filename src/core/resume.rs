/*!
 * Byte-range resume for interrupted downloads
 */

use orbit_storage_interface::ByteRange;
use std::io;
use std::path::Path;

/// Range of the object still missing from `local_path`
///
/// Starts at the current local length (0 when the file does not exist)
/// and runs to the end of the object.
pub async fn byte_range_remaining(local_path: &Path) -> io::Result<ByteRange> {
    let offset = match tokio::fs::metadata(local_path).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e),
    };
    Ok(ByteRange::from_offset(offset))
}

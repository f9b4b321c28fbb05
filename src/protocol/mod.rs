/*!
 * Storage service clients
 *
 * Concrete [`ObjectStorageClient`](orbit_storage_interface::ObjectStorageClient)
 * implementations. The transfer engine never names these directly; callers
 * build one and hand it to a [`TransferManager`](crate::TransferManager).
 */

pub mod s3;

//! Native S3 client
//!
//! An [`ObjectStorageClient`](orbit_storage_interface::ObjectStorageClient)
//! built on the official AWS SDK for Rust. Works against AWS S3 and
//! S3-compatible services such as MinIO or LocalStack.
//!
//! # Using MinIO or S3-Compatible Storage
//!
//! ```no_run
//! use std::sync::Arc;
//! use orbit_transfer::protocol::s3::{S3Client, S3ClientConfig};
//! use orbit_transfer::{TransferConfig, TransferManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = S3ClientConfig {
//!         endpoint: Some("http://localhost:9000".to_string()),
//!         region: Some("us-east-1".to_string()), // Required even for MinIO
//!         access_key: Some("minioadmin".to_string()),
//!         secret_key: Some("minioadmin".to_string()),
//!         force_path_style: true,
//!         ..Default::default()
//!     };
//!
//!     let client = S3Client::new(config).await?;
//!     let manager = TransferManager::new(Arc::new(client), TransferConfig::default())?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;

pub use client::S3Client;
pub use config::S3ClientConfig;

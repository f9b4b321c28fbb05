/*!
 * Configuration types for Orbit transfers
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TransferError};

/// Transfer policy shared by every command spawned from one manager
///
/// Construct once (directly, from TOML, or through [`TransferConfigBuilder`])
/// and hand it to a [`TransferManager`](crate::TransferManager); it is never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum concurrent service requests per transfer (parts, files, aborts)
    pub concurrent_service_requests: usize,

    /// Content length at or above which uploads switch to multipart
    pub min_size_before_part_upload: u64,

    /// How long failed multipart uploads wait for in-flight parts before aborting
    pub multipart_finalize_timeout_ms: u64,

    /// Bytes transferred between progress events
    pub progress_interval: u64,

    /// Read chunk size used when buffering forward-only streams
    pub read_buffer_size: usize,

    /// Override of the storage client's retry budget for resumable downloads
    pub max_retries: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrent_service_requests: crate::DEFAULT_CONCURRENT_SERVICE_REQUESTS,
            min_size_before_part_upload: crate::DEFAULT_MIN_SIZE_BEFORE_PART_UPLOAD,
            multipart_finalize_timeout_ms: crate::DEFAULT_MULTIPART_FINALIZE_TIMEOUT_MS,
            progress_interval: crate::DEFAULT_PROGRESS_INTERVAL,
            read_buffer_size: crate::DEFAULT_READ_BUFFER_SIZE,
            max_retries: None,
        }
    }
}

impl TransferConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_service_requests == 0 {
            return Err(TransferError::Config(
                "concurrent_service_requests must be at least 1".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(TransferError::Config(
                "read_buffer_size must be at least 1 byte".to_string(),
            ));
        }

        if self.progress_interval == 0 {
            return Err(TransferError::Config(
                "progress_interval must be at least 1 byte".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TransferConfig = toml::from_str(content)
            .map_err(|e| TransferError::Config(format!("Invalid transfer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TransferError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Multipart finalize timeout as a duration
    pub fn multipart_finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.multipart_finalize_timeout_ms)
    }
}

/// Builder for TransferConfig
#[derive(Debug, Default)]
pub struct TransferConfigBuilder {
    config: TransferConfig,
}

impl TransferConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency level
    pub fn concurrent_service_requests(mut self, count: usize) -> Self {
        self.config.concurrent_service_requests = count;
        self
    }

    /// Set the multipart threshold
    pub fn min_size_before_part_upload(mut self, bytes: u64) -> Self {
        self.config.min_size_before_part_upload = bytes;
        self
    }

    pub fn multipart_finalize_timeout(mut self, timeout: Duration) -> Self {
        self.config.multipart_finalize_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.config.progress_interval = bytes;
        self
    }

    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.config.read_buffer_size = bytes;
        self
    }

    /// Override the client's retry budget for downloads
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = Some(retries);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<TransferConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration for binaries embedding the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level for diagnostic output
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.concurrent_service_requests, 10);
        assert_eq!(config.min_size_before_part_upload, 16 * 1024 * 1024);
        assert_eq!(config.multipart_finalize_timeout(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = TransferConfigBuilder::new()
            .concurrent_service_requests(0)
            .build();
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = TransferConfig::from_toml_str(
            r#"
            concurrent_service_requests = 4
            multipart_finalize_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrent_service_requests, 4);
        assert_eq!(config.multipart_finalize_timeout_ms, 250);
        assert_eq!(config.min_size_before_part_upload, crate::DEFAULT_MIN_SIZE_BEFORE_PART_UPLOAD);
        assert_eq!(config.max_retries, None);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = TransferConfig::from_toml_str("concurrent_service_requests = \"many\"");
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.toml");

        let config = TransferConfigBuilder::new()
            .concurrent_service_requests(3)
            .max_retries(7)
            .build()
            .unwrap();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = TransferConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}

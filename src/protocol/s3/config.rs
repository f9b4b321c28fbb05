//! Configuration types for the S3 client

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// S3 client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3ClientConfig {
    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// AWS access key ID (optional - uses credential chain if not provided)
    pub access_key: Option<String>,

    /// AWS secret access key (optional - uses credential chain if not provided)
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    pub session_token: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// Per-operation timeout in seconds
    pub timeout_seconds: u64,

    /// Retries the SDK applies to each request
    ///
    /// Resumable downloads reuse this budget for their own retry loop.
    pub max_retries: u32,
}

impl Default for S3ClientConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: 300,
            max_retries: orbit_storage_interface::DEFAULT_MAX_RETRIES,
        }
    }
}

impl S3ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(TransferError::Config(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                TransferError::Config(format!("Invalid endpoint '{}': {}", endpoint, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(TransferError::Config(format!(
                    "Endpoint must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(TransferError::Config(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if using explicit credentials
    pub fn has_explicit_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(S3ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let config = S3ClientConfig {
            access_key: Some("AKIA".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));
    }

    #[test]
    fn test_endpoint_scheme_checked() {
        let config = S3ClientConfig {
            endpoint: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = S3ClientConfig {
            endpoint: Some("ftp://localhost".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = S3ClientConfig {
            endpoint: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_uses_defaults() {
        let config: S3ClientConfig = toml::from_str("region = \"eu-west-1\"").unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.timeout_seconds, 300);
        assert!(!config.has_explicit_credentials());
    }
}

//! Configuration management for the transfer engine

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The most parts the service will track for one large file
pub const MAX_PARTS_PER_LARGE_FILE: u32 = 10_000;

/// Configuration for the transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum number of attempts per operation, including the first (default: 8)
    ///
    /// With the default backoff this sleeps 1+2+4+...+64 seconds in the worst case.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in seconds; doubles after each retry (default: 1)
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// How many buckets the upload url cache tracks before evicting (default: 100)
    #[serde(default = "default_upload_url_cache_buckets")]
    pub upload_url_cache_buckets: usize,

    /// Ceiling on the number of parts in one large file (default: 10000)
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,

    /// Buffer size used when copying downloaded content (default: 4KB)
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,

    /// How many parts of one large file are uploaded at once (default: 4)
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,

    /// Whether file downloads are re-read from disk to verify their sha1 (default: true)
    #[serde(default = "default_true")]
    pub verify_downloads_by_rereading: bool,
}

// Default value functions for serde
fn default_max_attempts() -> u32 {
    8
}

fn default_initial_backoff_secs() -> u64 {
    1
}

fn default_upload_url_cache_buckets() -> usize {
    100
}

fn default_max_parts() -> u32 {
    MAX_PARTS_PER_LARGE_FILE
}

fn default_copy_buffer_size() -> usize {
    4 * 1024
}

fn default_max_concurrent_parts() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            upload_url_cache_buckets: default_upload_url_cache_buckets(),
            max_parts: default_max_parts(),
            copy_buffer_size: default_copy_buffer_size(),
            max_concurrent_parts: default_max_concurrent_parts(),
            verify_downloads_by_rereading: default_true(),
        }
    }
}

impl TransferConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(TransferConfig)` if loading and validation succeed
    /// * `Err(TransferError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            TransferError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: TransferConfig = serde_yaml::from_str(content).map_err(|e| {
            TransferError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - max_attempts must be at least 1
    /// - upload_url_cache_buckets must be at least 1
    /// - max_parts must be between 2 and 10000
    /// - copy_buffer_size must be > 0
    /// - max_concurrent_parts must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TransferError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.upload_url_cache_buckets == 0 {
            return Err(TransferError::ConfigError(
                "upload_url_cache_buckets must be at least 1".to_string(),
            ));
        }

        if self.max_parts < 2 || self.max_parts > MAX_PARTS_PER_LARGE_FILE {
            return Err(TransferError::ConfigError(format!(
                "max_parts must be between 2 and {}, got {}",
                MAX_PARTS_PER_LARGE_FILE, self.max_parts
            )));
        }

        if self.copy_buffer_size == 0 {
            return Err(TransferError::ConfigError(
                "copy_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_parts == 0 {
            return Err(TransferError::ConfigError(
                "max_concurrent_parts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

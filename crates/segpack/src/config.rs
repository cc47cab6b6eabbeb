//! Configuration for packing and reading containers

use crate::{DEFAULT_COPY_BUFFER_SIZE, DEFAULT_READ_BUFFER_SIZE, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning knobs shared by writers, readers and directories.
///
/// None of these affect the bytes of a container; they only change how
/// it is produced and consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Refill buffer size for buffered inputs (bytes)
    pub read_buffer_size: usize,

    /// Transfer buffer size used while copying payloads (bytes)
    pub copy_buffer_size: usize,

    /// Write containers under a staging name and rename on success
    pub staged_finalize: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            staged_finalize: false,
        }
    }
}

impl PackConfig {
    /// Set the refill buffer size for buffered inputs
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the payload transfer buffer size
    #[must_use]
    pub const fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size;
        self
    }

    /// Enable or disable staged (write then rename) finalize
    #[must_use]
    pub const fn with_staged_finalize(mut self, enable: bool) -> Self {
        self.staged_finalize = enable;
        self
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(StoreError::InvalidArgument(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.copy_buffer_size == 0 {
            return Err(StoreError::InvalidArgument(
                "copy_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| StoreError::InvalidArgument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PackConfig::default();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.copy_buffer_size, DEFAULT_COPY_BUFFER_SIZE);
        assert!(!config.staged_finalize);
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let config = PackConfig::default().with_copy_buffer_size(0);
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidArgument(_))
        ));

        let config = PackConfig::default().with_read_buffer_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("segpack.json");
        std::fs::write(&path, br#"{ "staged_finalize": true }"#).expect("write config");

        let config = PackConfig::from_json_file(&path).expect("config should load");
        assert!(config.staged_finalize);
        assert_eq!(config.copy_buffer_size, DEFAULT_COPY_BUFFER_SIZE);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("segpack.json");
        std::fs::write(&path, b"{ not json").expect("write config");

        assert!(matches!(
            PackConfig::from_json_file(&path),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}

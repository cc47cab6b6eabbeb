//! Physical namespace and stream primitives.
//!
//! A [`Directory`] is a flat namespace of named byte files. It hands out
//! [`IndexInput`]s for reading and [`IndexOutput`]s for writing, and
//! answers metadata questions (length, modification time, existence).
//!
//! Two implementations are provided:
//! - [`FsDirectory`]: one directory on the local filesystem
//! - [`RamDirectory`]: files held in memory
//!
//! A compound container reader also implements [`Directory`], read-only.

pub mod buffered;
pub mod codec;
pub mod fs;
pub mod input;
pub mod output;
pub mod ram;

pub use buffered::{BufferedInput, RandomRead};
pub use fs::FsDirectory;
pub use input::IndexInput;
pub use output::IndexOutput;
pub use ram::RamDirectory;

use crate::{MAX_NAME_LEN, Result, StoreError};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A flat namespace of named files.
///
/// Names are plain strings; implementations decide how they map onto
/// storage. Every method takes `&self` so a directory can be shared between
/// threads behind an `Arc`.
pub trait Directory: Send + Sync + fmt::Debug {
    /// Names of all files in the directory (order not significant).
    fn list(&self) -> Result<Vec<String>>;

    /// Whether a file with this name exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Last modification time in milliseconds since the Unix epoch.
    fn file_modified(&self, name: &str) -> Result<u64>;

    /// Set the modification time of an existing file to now.
    fn touch_file(&self, name: &str) -> Result<()>;

    /// Remove a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Rename a file, replacing any existing file named `to`.
    fn rename_file(&self, from: &str, to: &str) -> Result<()>;

    /// Length of a file in bytes.
    fn file_length(&self, name: &str) -> Result<u64>;

    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>>;

    /// Construct a named lock scoped to this directory.
    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>>;
}

/// Advisory lock on a name inside a directory.
pub trait Lock: Send + fmt::Debug {
    /// Try to take the lock. Returns `false` if someone else holds it.
    fn obtain(&mut self) -> Result<bool>;

    /// Release the lock if this handle holds it.
    fn release(&mut self) -> Result<()>;

    /// Whether anyone currently holds the lock.
    fn is_locked(&self) -> Result<bool>;
}

/// Reject empty or oversized names.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument(
            "name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "name of {} bytes exceeds limit of {MAX_NAME_LEN}",
            name.len()
        )));
    }
    Ok(())
}

/// Milliseconds since the Unix epoch for `time`.
pub(crate) fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("_0.cfs").is_ok());
        assert!(matches!(
            validate_name(""),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_millis_since_epoch() {
        assert_eq!(millis_since_epoch(UNIX_EPOCH), 0);
        let later = UNIX_EPOCH + std::time::Duration::from_millis(1500);
        assert_eq!(millis_since_epoch(later), 1500);
    }
}

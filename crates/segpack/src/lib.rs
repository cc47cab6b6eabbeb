//! Compound container files for segment storage.
//!
//! A compound container packs many independently named logical files into
//! a single physical file and later serves bounds-checked, random-access
//! read streams into it by logical name. Callers treat a container as a
//! small read-only [`Directory`] layered on top of one physical file, which
//! keeps the number of open file handles independent of the number of
//! logical files.
//!
//! The crate is split in two layers:
//!
//! - [`store`]: the physical namespace ([`Directory`], [`FsDirectory`],
//!   [`RamDirectory`]) and the stream primitives ([`IndexInput`],
//!   [`IndexOutput`], [`BufferedInput`]).
//! - [`compound`]: the container format, its writer ([`CompoundWriter`])
//!   and its reader ([`CompoundReader`]).
//!
//! # Container Layout
//!
//! ```text
//! [entry count: vuint]
//! [offset: u64 BE][name: vuint length + UTF-8]   x entry count
//! [payload bytes]                                 x entry count
//! ```
//!
//! # Example
//!
//! ```rust
//! use segpack::{CompoundReader, CompoundWriter, IndexInput, RamDirectory};
//! use std::sync::Arc;
//!
//! # fn example() -> segpack::Result<()> {
//! let dir = Arc::new(RamDirectory::new());
//! dir.write_file("_0.frq", b"frequencies")?;
//! dir.write_file("_0.prx", b"proximity")?;
//!
//! let mut writer = CompoundWriter::new(dir.clone(), "_0.cfs")?;
//! writer.add_file("_0.frq")?;
//! writer.add_file("_0.prx")?;
//! writer.close()?;
//!
//! let reader = CompoundReader::open(dir, "_0.cfs")?;
//! let mut input = reader.open_input("_0.prx")?;
//! let mut buf = vec![0u8; 9];
//! input.read_bytes(&mut buf)?;
//! assert_eq!(buf, b"proximity");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Physical namespace and stream primitives
pub mod store;

// Compound container format
pub mod compound;

// Configuration
pub mod config;

pub use compound::{CompoundReader, CompoundWriter, ReaderEntry, SubRangeInput, WriterEntry};
pub use config::PackConfig;
pub use store::{
    BufferedInput, Directory, FsDirectory, IndexInput, IndexOutput, Lock, RamDirectory,
    RandomRead,
};

/// Result type for store and container operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store and container operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The logical name was already added to this writer.
    #[error("File {0} already added")]
    DuplicateEntry(String),

    /// The writer has already been finalized.
    #[error("Container {0} already finalized")]
    AlreadyFinalized(String),

    /// Finalize was requested with no entries.
    #[error("Container {0} has no entries to pack")]
    EmptyContainer(String),

    /// The source stream ended before its declared length was copied.
    #[error("Short read copying {name}: {remaining} of {length} bytes never arrived")]
    ShortRead {
        /// Logical file being copied.
        name: String,
        /// Length the source declared.
        length: u64,
        /// Bytes still outstanding when the source ran dry.
        remaining: u64,
    },

    /// The output grew by a different amount than the source length.
    #[error("Length mismatch copying {name}: output grew by {written} bytes, source length is {expected}")]
    LengthMismatch {
        /// Logical file being copied.
        name: String,
        /// Length the source declared.
        expected: u64,
        /// Net change in output position.
        written: u64,
    },

    /// File or logical entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The container reader was closed.
    #[error("Container {0} is closed")]
    ContainerClosed(String),

    /// The container header is truncated or malformed.
    #[error("Corrupt container {name}: {reason}")]
    CorruptContainer {
        /// Physical name of the container.
        name: String,
        /// What failed to parse.
        reason: String,
    },

    /// A read extended past the end of a stream.
    #[error("Read past EOF: {position} + {requested} > {length}")]
    EndOfFile {
        /// Position the read started at.
        position: u64,
        /// Number of bytes requested.
        requested: u64,
        /// Length of the stream.
        length: u64,
    },

    /// The operation is not available on this directory.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A file with the target name already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The named lock is held by someone else.
    #[error("Lock {0} is held")]
    LockHeld(String),

    /// Primitive framing (vuint, string) could not be decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Check if this error reports a missing file or entry.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error means the bytes on disk cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptContainer { .. }
                | Self::ShortRead { .. }
                | Self::LengthMismatch { .. }
                | Self::Codec(_)
        )
    }
}

impl From<binrw::Error> for StoreError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) => Self::Io(e),
            other => Self::Codec(other.to_string()),
        }
    }
}

impl From<StoreError> for std::io::Error {
    fn from(err: StoreError) -> Self {
        use std::io::ErrorKind;

        match err {
            StoreError::Io(e) => e,
            StoreError::EndOfFile { .. } => Self::new(ErrorKind::UnexpectedEof, err),
            StoreError::NotFound(_) => Self::new(ErrorKind::NotFound, err),
            StoreError::AlreadyExists(_) => Self::new(ErrorKind::AlreadyExists, err),
            StoreError::UnsupportedOperation(_) => Self::new(ErrorKind::Unsupported, err),
            StoreError::InvalidArgument(_) => Self::new(ErrorKind::InvalidInput, err),
            StoreError::Codec(_) | StoreError::CorruptContainer { .. } => {
                Self::new(ErrorKind::InvalidData, err)
            }
            other => Self::other(other),
        }
    }
}

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest logical or physical name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 4096;

/// Default transfer buffer used when copying payloads into a container.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024;

/// Default refill buffer for buffered inputs.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

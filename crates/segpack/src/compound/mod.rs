//! Compound container format.
//!
//! A container is written once by [`CompoundWriter`] and read any number
//! of times by [`CompoundReader`]. The header lists every logical file
//! with the absolute offset of its payload; lengths are implied by the
//! next entry's offset (or the end of the container).

pub mod directory;
pub mod reader;
pub mod slice;
pub mod writer;

pub use directory::{DirectorySlot, ReaderEntry, WriterEntry, directory_len, read_directory};
pub use reader::CompoundReader;
pub use slice::{SliceSource, SubRangeInput};
pub use writer::CompoundWriter;

//! Seekable output streams.

use crate::Result;
use crate::store::codec;
use std::fmt;
use std::io::{Seek, SeekFrom, Write};

/// A seekable, write-only byte stream.
///
/// Outputs are created fresh (truncated) by
/// [`Directory::create_output`](crate::Directory::create_output). Seeking
/// backwards and overwriting is allowed, which is what the container
/// writer relies on to patch its directory.
pub trait IndexOutput: Write + Seek + Send + fmt::Debug {
    /// Current write position.
    fn file_pointer(&self) -> u64;

    /// Number of bytes written so far, counting overwritten regions once.
    fn length(&self) -> u64;

    /// Flush and release the underlying resource.
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all of `buf` at the current position.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        Ok(())
    }

    /// Move to an absolute position.
    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Write a single byte.
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }

    /// Write a `vuint`.
    fn write_vuint(&mut self, value: u32) -> Result<()> {
        codec::write_vuint(self, value)?;
        Ok(())
    }

    /// Write an 8-byte big-endian integer.
    fn write_long(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a length-prefixed string.
    fn write_string(&mut self, value: &str) -> Result<()> {
        codec::write_string(self, value)?;
        Ok(())
    }
}

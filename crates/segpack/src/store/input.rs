//! Random-access input streams.

use crate::store::codec;
use crate::{MAX_NAME_LEN, Result};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// A seekable, cloneable, read-only byte stream.
///
/// [`read_bytes`](Self::read_bytes) is exact: it either fills the whole
/// buffer or fails, and a read that would cross the end of the stream
/// reports [`StoreError::EndOfFile`](crate::StoreError::EndOfFile). The
/// [`Read`] implementation follows the usual short-read conventions and
/// returns `Ok(0)` at end of stream.
pub trait IndexInput: Read + Seek + Send + fmt::Debug {
    /// Fill `buf` completely from the current position.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Current position, relative to the start of this stream.
    fn file_pointer(&self) -> u64;

    /// Total length of this stream.
    fn length(&self) -> u64;

    /// Independent stream over the same bytes, starting at the same position.
    fn clone_input(&self) -> Box<dyn IndexInput>;

    /// Release the underlying resource.
    fn close(&mut self) -> Result<()>;

    /// Move to an absolute position.
    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    /// Read a `vuint`.
    fn read_vuint(&mut self) -> Result<u32> {
        Ok(codec::read_vuint(self)?)
    }

    /// Read an 8-byte big-endian integer.
    fn read_long(&mut self) -> Result<i64> {
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes)?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Read a length-prefixed string.
    fn read_string(&mut self) -> Result<String> {
        Ok(codec::read_string(self, MAX_NAME_LEN)?)
    }
}

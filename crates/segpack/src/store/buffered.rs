//! Buffered input over a positional byte source.
//!
//! [`BufferedInput`] keeps a small refill buffer and a cursor, and asks its
//! [`RandomRead`] source for bytes only when the buffer runs dry. The source
//! is addressed by absolute position on every call, so any number of
//! buffered inputs (and their clones) can share one source.

use crate::store::IndexInput;
use crate::{Result, StoreError};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// A byte source that can be read at an arbitrary position.
pub trait RandomRead: Send + Sync + fmt::Debug {
    /// Fill `buf` with the bytes starting at `pos`.
    ///
    /// Implementations must fail with [`StoreError::EndOfFile`] when
    /// `pos + buf.len()` exceeds [`length`](Self::length).
    fn read_internal(&self, pos: u64, buf: &mut [u8]) -> Result<()>;

    /// Total number of readable bytes.
    fn length(&self) -> u64;

    /// Release whatever the source owns. Shared views do nothing.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Buffered, seekable [`IndexInput`] over a [`RandomRead`] source.
///
/// Cloning copies the cursor and buffer but shares the source.
#[derive(Debug, Clone)]
pub struct BufferedInput<S> {
    source: S,
    buffer: Vec<u8>,
    buffer_size: usize,
    /// Absolute position of `buffer[0]`
    buffer_start: u64,
    /// Cursor inside `buffer`
    buffer_pos: usize,
}

impl<S: RandomRead> BufferedInput<S> {
    /// Wrap `source` with a refill buffer of `buffer_size` bytes.
    pub fn new(source: S, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            source,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            buffer_start: 0,
            buffer_pos: 0,
        }
    }

    /// The underlying source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Refill buffer size.
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn position(&self) -> u64 {
        self.buffer_start + self.buffer_pos as u64
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.buffer_pos
    }

    /// Load the next buffer's worth of bytes at the current position.
    fn refill(&mut self, requested: usize) -> Result<()> {
        let start = self.position();
        let length = self.source.length();
        let end = start.saturating_add(self.buffer_size as u64).min(length);
        if end <= start {
            return Err(StoreError::EndOfFile {
                position: start,
                requested: requested as u64,
                length,
            });
        }

        let count = (end - start) as usize;
        self.buffer.resize(count, 0);
        self.buffer_start = start;
        self.buffer_pos = 0;

        if let Err(err) = self.source.read_internal(start, &mut self.buffer) {
            self.buffer.clear();
            return Err(err);
        }
        Ok(())
    }

    fn reposition(&mut self, pos: u64) {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if pos >= self.buffer_start && pos <= buffer_end {
            self.buffer_pos = (pos - self.buffer_start) as usize;
        } else {
            self.buffer.clear();
            self.buffer_start = pos;
            self.buffer_pos = 0;
        }
    }
}

impl<S: RandomRead> Read for BufferedInput<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.available() == 0 {
            if self.position() >= self.source.length() {
                return Ok(0);
            }
            self.refill(buf.len())?;
        }

        let count = buf.len().min(self.available());
        buf[..count].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + count]);
        self.buffer_pos += count;
        Ok(count)
    }
}

impl<S: RandomRead> Seek for BufferedInput<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.source.length().checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position().checked_add_signed(offset),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        self.reposition(target);
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}

impl<S> IndexInput for BufferedInput<S>
where
    S: RandomRead + Clone + 'static,
{
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let available = self.available();
        if buf.len() <= available {
            buf.copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + buf.len()]);
            self.buffer_pos += buf.len();
            return Ok(());
        }

        // Drain what is buffered, then satisfy the rest
        buf[..available].copy_from_slice(&self.buffer[self.buffer_pos..]);
        self.buffer_pos += available;
        let rest = &mut buf[available..];

        if rest.len() < self.buffer_size {
            self.refill(rest.len())?;
            if self.buffer.len() < rest.len() {
                let position = self.position();
                self.buffer_pos = self.buffer.len();
                return Err(StoreError::EndOfFile {
                    position,
                    requested: rest.len() as u64,
                    length: self.source.length(),
                });
            }
            rest.copy_from_slice(&self.buffer[..rest.len()]);
            self.buffer_pos = rest.len();
        } else {
            // Large reads bypass the buffer
            let start = self.position();
            self.source.read_internal(start, rest)?;
            self.buffer.clear();
            self.buffer_start = start + rest.len() as u64;
            self.buffer_pos = 0;
        }
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.position()
    }

    fn length(&self) -> u64 {
        self.source.length()
    }

    fn clone_input(&self) -> Box<dyn IndexInput> {
        Box::new(self.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.reposition(pos);
        Ok(())
    }
}

//! In-memory directory.

use crate::store::{
    BufferedInput, Directory, IndexInput, IndexOutput, Lock, RandomRead, millis_since_epoch,
    validate_name,
};
use crate::{DEFAULT_READ_BUFFER_SIZE, Result, StoreError};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct RamFile {
    data: Bytes,
    modified: u64,
}

impl RamFile {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            modified: millis_since_epoch(SystemTime::now()),
        }
    }
}

type FileMap = Arc<RwLock<HashMap<String, RamFile>>>;

/// A [`Directory`] whose files live in memory.
///
/// Clones share the same files. Outputs become visible to readers when they
/// are closed.
#[derive(Debug, Clone)]
pub struct RamDirectory {
    files: FileMap,
    locks: Arc<Mutex<HashSet<String>>>,
    read_buffer_size: usize,
}

impl Default for RamDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RamDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashSet::new())),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Use `size` as the refill buffer for inputs opened from this directory.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Store `data` under `name`, replacing any existing file.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.files
            .write()
            .insert(name.to_string(), RamFile::new(Bytes::copy_from_slice(data)));
        Ok(())
    }

    /// Full contents of `name`.
    pub fn read_file(&self, name: &str) -> Result<Bytes> {
        self.files
            .read()
            .get(name)
            .map(|file| file.data.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

impl Directory for RamDirectory {
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn file_modified(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|file| file.modified)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn touch_file(&self, name: &str) -> Result<()> {
        let mut files = self.files.write();
        let file = files
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        // Always move forward, even within the same millisecond
        let now = millis_since_epoch(SystemTime::now());
        file.modified = now.max(file.modified + 1);
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        validate_name(to)?;
        let mut files = self.files.write();
        let file = files
            .remove(from)
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), file);
        Ok(())
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|file| file.data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        let data = self.read_file(name)?;
        Ok(Box::new(BufferedInput::new(
            RamSource(data),
            self.read_buffer_size,
        )))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        validate_name(name)?;
        self.files
            .write()
            .insert(name.to_string(), RamFile::new(Bytes::new()));
        Ok(Box::new(RamOutput {
            buffer: Cursor::new(Vec::new()),
            files: Arc::clone(&self.files),
            name: name.to_string(),
            closed: false,
        }))
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        validate_name(name)?;
        Ok(Box::new(RamLock {
            locks: Arc::clone(&self.locks),
            name: name.to_string(),
            held: false,
        }))
    }
}

/// Positional reads over a shared, immutable byte buffer.
#[derive(Debug, Clone)]
pub struct RamSource(Bytes);

impl RandomRead for RamSource {
    fn read_internal(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let length = self.0.len() as u64;
        let requested = buf.len() as u64;
        if pos.saturating_add(requested) > length {
            return Err(StoreError::EndOfFile {
                position: pos,
                requested,
                length,
            });
        }
        let start = pos as usize;
        buf.copy_from_slice(&self.0[start..start + buf.len()]);
        Ok(())
    }

    fn length(&self) -> u64 {
        self.0.len() as u64
    }
}

/// Output that publishes its bytes to the directory on close.
#[derive(Debug)]
struct RamOutput {
    buffer: Cursor<Vec<u8>>,
    files: FileMap,
    name: String,
    closed: bool,
}

impl RamOutput {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other(format!("{} is closed", self.name)));
        }
        Ok(())
    }
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RamOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        self.buffer.seek(pos)
    }
}

impl IndexOutput for RamOutput {
    fn file_pointer(&self) -> u64 {
        self.buffer.position()
    }

    fn length(&self) -> u64 {
        self.buffer.get_ref().len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let data = Bytes::from(std::mem::take(self.buffer.get_mut()));
        self.files
            .write()
            .insert(self.name.clone(), RamFile::new(data));
        Ok(())
    }
}

#[derive(Debug)]
struct RamLock {
    locks: Arc<Mutex<HashSet<String>>>,
    name: String,
    held: bool,
}

impl Lock for RamLock {
    fn obtain(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        self.held = self.locks.lock().insert(self.name.clone());
        Ok(self.held)
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            self.locks.lock().remove(&self.name);
            self.held = false;
        }
        Ok(())
    }

    fn is_locked(&self) -> Result<bool> {
        Ok(self.locks.lock().contains(&self.name))
    }
}

impl Drop for RamLock {
    fn drop(&mut self) {
        if self.held {
            self.locks.lock().remove(&self.name);
        }
    }
}

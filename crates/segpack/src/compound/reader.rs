//! Read-only access to a packed container.

use crate::compound::directory::{ReaderEntry, read_directory};
use crate::compound::slice::{SharedStream, SliceSource, SubRangeInput};
use crate::config::PackConfig;
use crate::store::{Directory, IndexInput, IndexOutput, Lock, validate_name};
use crate::{Result, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A packed container opened for reading.
///
/// The reader owns one physical input and hands out [`SubRangeInput`]s that
/// share it. It also implements [`Directory`] so a container can stand in
/// for the directory its files came from, read-only.
pub struct CompoundReader {
    directory: Arc<dyn Directory>,
    name: String,
    stream: Arc<SharedStream>,
    entries: RwLock<HashMap<String, ReaderEntry>>,
    /// Entry names as they appear in the directory
    order: Vec<String>,
    read_buffer_size: usize,
}

impl fmt::Debug for CompoundReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundReader")
            .field("name", &self.name)
            .field("entries", &self.entries.read().len())
            .field("open", &self.stream.is_open())
            .finish_non_exhaustive()
    }
}

impl CompoundReader {
    /// Open the container `name` in `directory` with default settings.
    pub fn open(directory: Arc<dyn Directory>, name: &str) -> Result<Self> {
        Self::open_with_config(directory, name, &PackConfig::default())
    }

    /// Open the container `name` in `directory`.
    ///
    /// The whole directory is parsed up front. If parsing fails the
    /// physical input is closed before the error is returned.
    pub fn open_with_config(
        directory: Arc<dyn Directory>,
        name: &str,
        config: &PackConfig,
    ) -> Result<Self> {
        config.validate()?;
        validate_name(name)?;

        let mut stream = directory.open_input(name)?;
        let physical_length = stream.length();

        let parsed = match read_directory(&mut stream, physical_length, name) {
            Ok(parsed) => parsed,
            Err(err) => {
                match stream.close() {
                    Ok(()) => {}
                    Err(StoreError::Io(close_err)) => {
                        warn!("Failed to close {} after bad header: {}", name, close_err);
                    }
                    Err(close_err) => return Err(close_err),
                }
                return Err(err);
            }
        };

        for (entry_name, entry) in &parsed {
            debug!(
                "Entry {} at offset {} ({} bytes)",
                entry_name, entry.offset, entry.length
            );
        }
        info!(
            "Opened container {} with {} entries ({} bytes)",
            name,
            parsed.len(),
            physical_length
        );

        let order = parsed.iter().map(|(entry_name, _)| entry_name.clone()).collect();
        Ok(Self {
            directory,
            name: name.to_string(),
            stream: Arc::new(SharedStream::new(name, stream)),
            entries: RwLock::new(parsed.into_iter().collect()),
            order,
            read_buffer_size: config.read_buffer_size,
        })
    }

    /// Open a stream over the logical file `name`.
    pub fn open_input(&self, name: &str) -> Result<SubRangeInput> {
        let entries = self.entries.read();
        if !self.stream.is_open() {
            return Err(StoreError::ContainerClosed(self.name.clone()));
        }
        let entry = entries
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("{name} in {}", self.name)))?;

        let source = SliceSource::new(Arc::clone(&self.stream), entry.offset, entry.length);
        Ok(SubRangeInput::new(source, self.read_buffer_size))
    }

    /// Release the physical input and forget every entry.
    ///
    /// Streams opened earlier fail on their next refill. Closing an already
    /// closed reader does nothing.
    pub fn close(&self) -> Result<()> {
        let mut entries = self.entries.write();
        if !self.stream.is_open() {
            return Ok(());
        }
        entries.clear();
        debug!("Closing container {}", self.name);
        self.stream.close()
    }

    /// Physical name of the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory the container lives in.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Number of logical files.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the container has no logical files (or has been closed).
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Location of one logical file.
    pub fn entry(&self, name: &str) -> Option<ReaderEntry> {
        self.entries.read().get(name).copied()
    }

    /// Every logical file in directory order. Empty once closed.
    pub fn entries(&self) -> Vec<(String, ReaderEntry)> {
        let entries = self.entries.read();
        self.order
            .iter()
            .filter_map(|name| entries.get(name).map(|entry| (name.clone(), *entry)))
            .collect()
    }
}

impl Directory for CompoundReader {
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    fn file_modified(&self, _name: &str) -> Result<u64> {
        self.directory.file_modified(&self.name)
    }

    fn touch_file(&self, _name: &str) -> Result<()> {
        self.directory.touch_file(&self.name)
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        Err(StoreError::UnsupportedOperation(
            "containers are read-only: delete_file",
        ))
    }

    fn rename_file(&self, _from: &str, _to: &str) -> Result<()> {
        Err(StoreError::UnsupportedOperation(
            "containers are read-only: rename_file",
        ))
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.entry(name)
            .map(|entry| entry.length)
            .ok_or_else(|| StoreError::NotFound(format!("{name} in {}", self.name)))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        let input = Self::open_input(self, name)?;
        Ok(Box::new(input))
    }

    fn create_output(&self, _name: &str) -> Result<Box<dyn IndexOutput>> {
        Err(StoreError::UnsupportedOperation(
            "containers are read-only: create_output",
        ))
    }

    fn make_lock(&self, _name: &str) -> Result<Box<dyn Lock>> {
        Err(StoreError::UnsupportedOperation(
            "containers are read-only: make_lock",
        ))
    }
}

impl Drop for CompoundReader {
    fn drop(&mut self) {
        if let Err(e) = self.stream.close() {
            warn!("Failed to close container {}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::RamDirectory;
    use crate::store::codec::{write_string, write_vuint};

    /// Hand-built container: "a" -> [1,2,3], "b" -> [4,5].
    fn sample() -> Arc<RamDirectory> {
        let mut bytes = Vec::new();
        write_vuint(&mut bytes, 2).expect("count");
        bytes.extend_from_slice(&21i64.to_be_bytes());
        write_string(&mut bytes, "a").expect("name");
        bytes.extend_from_slice(&24i64.to_be_bytes());
        write_string(&mut bytes, "b").expect("name");
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);

        let dir = Arc::new(RamDirectory::new());
        dir.write_file("_0.cfs", &bytes).expect("write");
        dir
    }

    #[test]
    fn test_entries_and_lookup() {
        let reader = CompoundReader::open(sample(), "_0.cfs").expect("open");

        assert_eq!(reader.name(), "_0.cfs");
        assert_eq!(reader.len(), 2);
        assert_eq!(
            reader.entry("a"),
            Some(ReaderEntry {
                offset: 21,
                length: 3
            })
        );
        assert_eq!(reader.file_length("b").expect("length"), 2);
        assert!(reader.file_exists("b"));
        assert!(!reader.file_exists("c"));

        let names: Vec<_> = reader.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_entries_keep_directory_order() {
        // "z" and "a" are empty and share an offset with "m"
        let mut bytes = Vec::new();
        write_vuint(&mut bytes, 3).expect("count");
        for name in ["z", "a", "m"] {
            bytes.extend_from_slice(&31i64.to_be_bytes());
            write_string(&mut bytes, name).expect("name");
        }
        bytes.extend_from_slice(&[7, 8, 9]);
        let dir = Arc::new(RamDirectory::new());
        dir.write_file("_1.cfs", &bytes).expect("write");

        let reader = CompoundReader::open(dir, "_1.cfs").expect("open");
        let names: Vec<_> = reader.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["z", "a", "m"]);
        assert_eq!(reader.file_length("a").expect("length"), 0);
        assert_eq!(reader.file_length("m").expect("length"), 3);

        reader.close().expect("close");
        assert!(reader.entries().is_empty());
    }

    #[test]
    fn test_open_input_reads_slice() {
        let reader = CompoundReader::open(sample(), "_0.cfs").expect("open");
        let mut input = reader.open_input("b").expect("open b");
        let mut buf = [0u8; 2];
        input.read_bytes(&mut buf).expect("read");
        assert_eq!(buf, [4, 5]);

        let err = reader.open_input("missing").expect_err("unknown");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_close_invalidates_streams() {
        let reader = CompoundReader::open(sample(), "_0.cfs").expect("open");
        let mut input = reader.open_input("a").expect("open a");

        reader.close().expect("close");
        reader.close().expect("second close");

        assert!(reader.is_empty());
        assert!(matches!(
            reader.open_input("a"),
            Err(StoreError::ContainerClosed(_))
        ));
        assert!(matches!(
            input.read_byte(),
            Err(StoreError::ContainerClosed(_))
        ));
    }

    #[test]
    fn test_mutations_unsupported() {
        let reader = CompoundReader::open(sample(), "_0.cfs").expect("open");

        assert!(matches!(
            reader.create_output("x"),
            Err(StoreError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            reader.delete_file("a"),
            Err(StoreError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            reader.rename_file("a", "z"),
            Err(StoreError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            reader.make_lock("write.lock"),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_timestamps_delegate_to_container_file() {
        let dir = sample();
        let reader = CompoundReader::open(dir.clone(), "_0.cfs").expect("open");

        let before = dir.file_modified("_0.cfs").expect("modified");
        assert_eq!(reader.file_modified("a").expect("modified"), before);
        reader.touch_file("anything").expect("touch");
        assert!(dir.file_modified("_0.cfs").expect("modified") > before);
    }

    #[test]
    fn test_missing_container() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let err = CompoundReader::open(dir, "nope.cfs").expect_err("missing");
        assert!(err.is_not_found());
    }
}

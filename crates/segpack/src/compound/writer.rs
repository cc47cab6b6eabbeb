//! Packing logical files into a container.
//!
//! Finalize runs in three passes over one seekable output:
//!
//! 1. write the entry count and one slot per entry, offsets zeroed
//! 2. copy every source file, remembering where each payload starts
//! 3. seek back to each slot and patch in the payload offset
//!
//! Every copy is checked against the source's declared length, so a source
//! that shrinks mid-copy or an output that drops bytes fails loudly instead
//! of producing a container with shifted offsets.

use crate::compound::directory::{DirectorySlot, WriterEntry, directory_len};
use crate::config::PackConfig;
use crate::store::codec::{PrefixedString, VarUInt};
use crate::store::{Directory, IndexInput, IndexOutput, validate_name};
use crate::{Result, StoreError};
use binrw::BinWrite;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accumulates logical files and packs them into one container on
/// [`close`](Self::close).
pub struct CompoundWriter {
    directory: Arc<dyn Directory>,
    name: String,
    entries: Vec<WriterEntry>,
    ids: HashSet<String>,
    finalized: bool,
    config: PackConfig,
}

impl fmt::Debug for CompoundWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundWriter")
            .field("name", &self.name)
            .field("entries", &self.entries)
            .field("finalized", &self.finalized)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompoundWriter {
    /// Create a writer for the container `name` in `directory`.
    ///
    /// Nothing is written until [`close`](Self::close).
    pub fn new(directory: Arc<dyn Directory>, name: &str) -> Result<Self> {
        Self::with_config(directory, name, PackConfig::default())
    }

    /// Create a writer with explicit settings.
    pub fn with_config(
        directory: Arc<dyn Directory>,
        name: &str,
        config: PackConfig,
    ) -> Result<Self> {
        config.validate()?;
        validate_name(name)?;
        Ok(Self {
            directory,
            name: name.to_string(),
            entries: Vec::new(),
            ids: HashSet::new(),
            finalized: false,
            config,
        })
    }

    /// Physical name of the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory the container is written to.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Number of pending logical files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no logical files have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending logical files in insertion order.
    pub fn entries(&self) -> &[WriterEntry] {
        &self.entries
    }

    /// Queue the file `name` from the directory for packing.
    ///
    /// The file is not touched until finalize, so it only has to exist by
    /// then. The container's own name, and its staging name when staged
    /// finalize is on, are rejected: finalize truncates those files before
    /// any source is read.
    pub fn add_file(&mut self, name: &str) -> Result<()> {
        if self.finalized {
            return Err(StoreError::AlreadyFinalized(self.name.clone()));
        }
        validate_name(name)?;
        if name == self.name || name == self.target() {
            return Err(StoreError::InvalidArgument(format!(
                "{name} would be overwritten while packing {}",
                self.name
            )));
        }
        if !self.ids.insert(name.to_string()) {
            return Err(StoreError::DuplicateEntry(name.to_string()));
        }
        self.entries.push(WriterEntry::new(name.to_string()));
        Ok(())
    }

    /// Write the container.
    ///
    /// The writer is finalized as soon as this starts, even if it fails. On
    /// failure the partial container is closed and deleted.
    pub fn close(&mut self) -> Result<()> {
        if self.finalized {
            return Err(StoreError::AlreadyFinalized(self.name.clone()));
        }
        if self.entries.is_empty() {
            return Err(StoreError::EmptyContainer(self.name.clone()));
        }
        self.finalized = true;

        let target = self.target();
        if target != self.name && self.directory.file_exists(&target) {
            return Err(StoreError::AlreadyExists(target));
        }

        let mut output = self.directory.create_output(&target)?;
        if let Err(err) = self.write_container(output.as_mut()) {
            self.discard(Some(output.as_mut()), &target)?;
            return Err(err);
        }
        let length = output.length();
        if let Err(err) = output.close() {
            self.discard(None, &target)?;
            return Err(err);
        }

        if target != self.name {
            if let Err(err) = self.directory.rename_file(&target, &self.name) {
                self.discard(None, &target)?;
                return Err(err);
            }
            debug!("Moved staged container {} into place", target);
        }

        info!(
            "Packed {} files into {} ({} bytes)",
            self.entries.len(),
            self.name,
            length
        );
        Ok(())
    }

    /// Name written during finalize: the container itself, or a staging
    /// name that is renamed into place afterwards.
    fn target(&self) -> String {
        if self.config.staged_finalize {
            format!("{}.tmp", self.name)
        } else {
            self.name.clone()
        }
    }

    fn write_container(&mut self, mut output: &mut dyn IndexOutput) -> Result<()> {
        let count = u32::try_from(self.entries.len()).map_err(|_| {
            StoreError::InvalidArgument(format!("too many entries: {}", self.entries.len()))
        })?;
        VarUInt(count).write_be(&mut output)?;

        // Pass 1: directory with placeholder offsets
        for entry in &mut self.entries {
            entry.directory_offset = output.file_pointer();
            DirectorySlot {
                offset: 0,
                name: PrefixedString(entry.name.clone()),
            }
            .write_be(&mut output)?;
        }
        debug!(
            "Wrote directory for {} ({} bytes)",
            self.name,
            directory_len(self.entries.iter().map(WriterEntry::name))
        );

        // Pass 2: payloads
        let mut buffer = vec![0u8; self.config.copy_buffer_size];
        for entry in &mut self.entries {
            entry.data_offset = output.file_pointer();
            let mut input = self.directory.open_input(&entry.name)?;
            let copied = copy_entry(&entry.name, input.as_mut(), &mut *output, &mut buffer);
            let closed = input.close();
            let length = copied?;
            closed?;
            debug!(
                "Copied {} ({} bytes) to offset {}",
                entry.name, length, entry.data_offset
            );
        }

        // Pass 3: patch offsets
        for entry in &self.entries {
            let offset = i64::try_from(entry.data_offset).map_err(|_| {
                StoreError::InvalidArgument(format!(
                    "offset {} of {} does not fit the directory",
                    entry.data_offset, entry.name
                ))
            })?;
            output.seek_to(entry.directory_offset)?;
            output.write_long(offset)?;
        }
        Ok(())
    }

    /// Best-effort cleanup of a failed finalize.
    ///
    /// Plain I/O failures are logged and dropped so the original error wins;
    /// anything else replaces it.
    fn discard(&self, output: Option<&mut dyn IndexOutput>, target: &str) -> Result<()> {
        if let Some(output) = output {
            match output.close() {
                Ok(()) => {}
                Err(StoreError::Io(e)) => warn!("Failed to close partial {}: {}", target, e),
                Err(e) => return Err(e),
            }
        }
        match self.directory.delete_file(target) {
            Ok(()) => debug!("Deleted partial container {}", target),
            Err(StoreError::Io(e)) => warn!("Failed to delete partial {}: {}", target, e),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Copy one source into the output and verify the byte counts.
///
/// Returns the number of bytes copied.
fn copy_entry(
    name: &str,
    input: &mut dyn IndexInput,
    output: &mut dyn IndexOutput,
    buffer: &mut [u8],
) -> Result<u64> {
    let length = input.length();
    let start = output.file_pointer();
    let mut remaining = length;

    while remaining > 0 {
        let chunk = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));
        let read = input.read(&mut buffer[..chunk])?;
        if read == 0 {
            break;
        }
        output.write_bytes(&buffer[..read])?;
        remaining -= read as u64;
    }

    if remaining != 0 {
        return Err(StoreError::ShortRead {
            name: name.to_string(),
            length,
            remaining,
        });
    }

    let written = output.file_pointer().saturating_sub(start);
    if written != length {
        return Err(StoreError::LengthMismatch {
            name: name.to_string(),
            expected: length,
            written,
        });
    }
    Ok(length)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::RamDirectory;
    use pretty_assertions::assert_eq;

    fn directory(files: &[(&str, &[u8])]) -> Arc<RamDirectory> {
        let dir = Arc::new(RamDirectory::new());
        for (name, data) in files {
            dir.write_file(name, data).expect("write source");
        }
        dir
    }

    #[test]
    fn test_exact_layout() {
        let dir = directory(&[("a", &[1, 2, 3]), ("b", &[4, 5])]);
        let mut writer = CompoundWriter::new(dir.clone(), "c").expect("writer");
        writer.add_file("a").expect("add a");
        writer.add_file("b").expect("add b");
        writer.close().expect("close");

        let mut expected = vec![2u8];
        expected.extend_from_slice(&21i64.to_be_bytes());
        expected.extend_from_slice(&[1, b'a']);
        expected.extend_from_slice(&24i64.to_be_bytes());
        expected.extend_from_slice(&[1, b'b']);
        expected.extend_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(dir.read_file("c").expect("container").to_vec(), expected);

        let entries = writer.entries();
        assert_eq!(entries[0].directory_offset(), 1);
        assert_eq!(entries[1].directory_offset(), 11);
        assert_eq!(entries[0].data_offset(), 21);
        assert_eq!(entries[1].data_offset(), 24);
    }

    #[test]
    fn test_add_file_rejections() {
        let dir = directory(&[("a", b"x")]);
        let mut writer = CompoundWriter::new(dir, "c").expect("writer");

        writer.add_file("a").expect("add");
        assert!(matches!(
            writer.add_file("a"),
            Err(StoreError::DuplicateEntry(ref n)) if n == "a"
        ));
        assert!(matches!(
            writer.add_file(""),
            Err(StoreError::InvalidArgument(_))
        ));
        assert_eq!(writer.len(), 1);

        writer.close().expect("close");
        assert!(matches!(
            writer.add_file("b"),
            Err(StoreError::AlreadyFinalized(_))
        ));
        assert!(matches!(
            writer.close(),
            Err(StoreError::AlreadyFinalized(_))
        ));
    }

    #[test]
    fn test_empty_writer_rejected() {
        let dir = directory(&[]);
        let mut writer = CompoundWriter::new(dir.clone(), "c").expect("writer");
        assert!(writer.is_empty());
        assert!(matches!(
            writer.close(),
            Err(StoreError::EmptyContainer(_))
        ));
        assert!(!dir.file_exists("c"));
    }

    #[test]
    fn test_missing_source_discards_partial() {
        let dir = directory(&[("a", b"abc")]);
        let mut writer = CompoundWriter::new(dir.clone(), "c").expect("writer");
        writer.add_file("a").expect("add");
        writer.add_file("ghost").expect("add");

        let err = writer.close().expect_err("ghost is missing");
        assert!(err.is_not_found());
        assert!(!dir.file_exists("c"));
        assert!(matches!(
            writer.close(),
            Err(StoreError::AlreadyFinalized(_))
        ));
    }

    #[test]
    fn test_small_copy_buffer() {
        let payload: Vec<u8> = (0..=255).collect();
        let dir = directory(&[("big", payload.as_slice())]);
        let config = PackConfig::default().with_copy_buffer_size(7);
        let mut writer = CompoundWriter::with_config(dir.clone(), "c", config).expect("writer");
        writer.add_file("big").expect("add");
        writer.close().expect("close");

        let container = dir.read_file("c").expect("container");
        assert_eq!(&container[container.len() - 256..], payload.as_slice());
    }

    #[test]
    fn test_staged_finalize_renames() {
        let dir = directory(&[("a", b"abc")]);
        let config = PackConfig::default().with_staged_finalize(true);
        let mut writer = CompoundWriter::with_config(dir.clone(), "c", config).expect("writer");
        writer.add_file("a").expect("add");
        writer.close().expect("close");

        assert!(dir.file_exists("c"));
        assert!(!dir.file_exists("c.tmp"));
    }

    #[test]
    fn test_container_name_not_packable() {
        let dir = directory(&[("c", b"old container"), ("c.tmp", b"keep")]);
        let mut writer = CompoundWriter::new(dir.clone(), "c").expect("writer");
        assert!(matches!(
            writer.add_file("c"),
            Err(StoreError::InvalidArgument(_))
        ));
        // Without staging the .tmp name is an ordinary file
        writer.add_file("c.tmp").expect("add c.tmp");
        writer.close().expect("close");
        assert_eq!(
            dir.read_file("c").expect("container").last().copied(),
            Some(b'p')
        );

        let config = PackConfig::default().with_staged_finalize(true);
        let mut writer = CompoundWriter::with_config(dir.clone(), "d", config).expect("writer");
        for name in ["d", "d.tmp"] {
            assert!(matches!(
                writer.add_file(name),
                Err(StoreError::InvalidArgument(_))
            ));
        }
        assert!(writer.is_empty());
    }

    #[test]
    fn test_staged_finalize_keeps_existing_staging_file() {
        let dir = directory(&[("a", b"abc"), ("c.tmp", b"precious")]);
        let config = PackConfig::default().with_staged_finalize(true);
        let mut writer = CompoundWriter::with_config(dir.clone(), "c", config).expect("writer");
        writer.add_file("a").expect("add");

        assert!(matches!(
            writer.close(),
            Err(StoreError::AlreadyExists(ref n)) if n == "c.tmp"
        ));
        assert_eq!(dir.read_file("c.tmp").expect("kept").to_vec(), b"precious");
        assert!(!dir.file_exists("c"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = directory(&[]);
        let config = PackConfig::default().with_copy_buffer_size(0);
        assert!(matches!(
            CompoundWriter::with_config(dir, "c", config),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}

//! Container directory: the header in front of the payloads.

use crate::store::codec::{PrefixedString, VarUInt, string_size, vuint_size};
use crate::{Result, StoreError};
use binrw::{BinRead, BinResult, BinWrite, Endian};
use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};

/// One directory record as stored on disk.
///
/// The offset is written as zero while the header is laid down and patched
/// once the payload position is known. The offset is always big-endian,
/// whatever endianness the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySlot {
    /// Absolute position of the payload
    pub offset: i64,
    /// Logical name
    pub name: PrefixedString,
}

impl BinRead for DirectorySlot {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let offset = i64::read_options(reader, Endian::Big, ())?;
        let name = PrefixedString::read_options(reader, Endian::Big, ())?;
        Ok(Self { offset, name })
    }
}

impl BinWrite for DirectorySlot {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.offset.write_options(writer, Endian::Big, ())?;
        self.name.write_options(writer, Endian::Big, ())?;
        Ok(())
    }
}

/// Fixed size of the offset field in a [`DirectorySlot`].
pub const SLOT_OFFSET_LEN: u64 = 8;

/// A logical file waiting to be packed by a
/// [`CompoundWriter`](crate::CompoundWriter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterEntry {
    pub(crate) name: String,
    pub(crate) directory_offset: u64,
    pub(crate) data_offset: u64,
}

impl WriterEntry {
    pub(crate) const fn new(name: String) -> Self {
        Self {
            name,
            directory_offset: 0,
            data_offset: 0,
        }
    }

    /// Logical name, also the name of the source file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this entry's directory slot. Zero until finalize.
    pub const fn directory_offset(&self) -> u64 {
        self.directory_offset
    }

    /// Position of this entry's payload. Zero until finalize.
    pub const fn data_offset(&self) -> u64 {
        self.data_offset
    }
}

/// Where a logical file lives inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderEntry {
    /// Absolute position of the first payload byte
    pub offset: u64,
    /// Payload length in bytes
    pub length: u64,
}

impl ReaderEntry {
    /// Position one past the last payload byte.
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Encoded size of a directory holding `names`.
pub fn directory_len<'a>(names: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut count = 0u32;
    let mut len = 0u64;
    for name in names {
        count += 1;
        len += SLOT_OFFSET_LEN + string_size(name) as u64;
    }
    vuint_size(count) as u64 + len
}

/// Parse a container directory and derive every entry's length.
///
/// `physical_length` is the size of the whole container; the last entry
/// runs to the end of it. Entries come back in on-disk order.
pub fn read_directory<R: Read + Seek>(
    reader: &mut R,
    physical_length: u64,
    container: &str,
) -> Result<Vec<(String, ReaderEntry)>> {
    let corrupt = |reason: String| StoreError::CorruptContainer {
        name: container.to_string(),
        reason,
    };

    let count = VarUInt::read_be(reader).map_err(|e| header_error(container, e))?.0;

    // The count comes from disk, so don't trust it for allocation
    let mut slots = Vec::with_capacity((count as usize).min(1024));
    for index in 0..count {
        let slot = DirectorySlot::read_be(reader).map_err(|e| header_error(container, e))?;
        let offset = u64::try_from(slot.offset)
            .map_err(|_| corrupt(format!("entry {index} has negative offset {}", slot.offset)))?;
        slots.push((slot.name.0, offset));
    }

    let header_end = reader.stream_position()?;
    let mut seen = HashSet::with_capacity(slots.len());
    let mut previous = header_end;
    for (name, offset) in &slots {
        if *offset < header_end {
            return Err(corrupt(format!(
                "{name} starts at {offset}, inside the directory ending at {header_end}"
            )));
        }
        if *offset > physical_length {
            return Err(corrupt(format!(
                "{name} starts at {offset}, past the end of the container ({physical_length})"
            )));
        }
        if *offset < previous {
            return Err(corrupt(format!(
                "{name} starts at {offset}, before the previous entry at {previous}"
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(corrupt(format!("{name} appears more than once")));
        }
        previous = *offset;
    }

    let ends = slots
        .iter()
        .skip(1)
        .map(|(_, offset)| *offset)
        .chain(std::iter::once(physical_length))
        .collect::<Vec<_>>();

    Ok(slots
        .into_iter()
        .zip(ends)
        .map(|((name, offset), end)| {
            let entry = ReaderEntry {
                offset,
                length: end - offset,
            };
            (name, entry)
        })
        .collect())
}

/// Classify a failure while decoding the header.
///
/// Truncated or malformed framing is corruption; any other I/O failure is
/// passed through.
fn header_error(container: &str, err: binrw::Error) -> StoreError {
    let reason = match err {
        binrw::Error::Io(e) => match e.kind() {
            io::ErrorKind::UnexpectedEof => "directory is truncated".to_string(),
            io::ErrorKind::InvalidData => format!("malformed directory: {e}"),
            _ => return StoreError::Io(e),
        },
        other => format!("malformed directory: {other}"),
    };
    StoreError::CorruptContainer {
        name: container.to_string(),
        reason,
    }
}

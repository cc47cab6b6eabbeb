//! Primitive framing shared by every stream.
//!
//! - `vuint`: unsigned 32-bit integer in 7-bit groups, low group first,
//!   high bit set on every byte except the last.
//! - `long`: 8-byte big-endian signed integer.
//! - `string`: `vuint` byte length followed by UTF-8 bytes.
//!
//! The free functions work on any [`Read`]/[`Write`]; [`VarUInt`] and
//! [`PrefixedString`] wrap them for `binrw` structs.

use crate::MAX_NAME_LEN;
use binrw::{BinRead, BinResult, BinWrite, Endian};
use std::io::{self, Read, Seek, Write};

/// Longest encoding of a 32-bit `vuint`.
pub const MAX_VUINT_LEN: usize = 5;

/// Read a `vuint`.
pub fn read_vuint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut result = 0u32;
    let mut shift = 0u32;

    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let byte = byte[0];

        // The fifth group only has room for the top 4 bits
        if shift == 28 && byte & 0xF0 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "vuint does not fit in 32 bits",
            ));
        }

        result |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Write a `vuint`.
pub fn write_vuint<W: Write + ?Sized>(writer: &mut W, value: u32) -> io::Result<()> {
    let mut buf = [0u8; MAX_VUINT_LEN];
    let mut len = 0;
    let mut value = value;

    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf[len] = byte;
        len += 1;
        if value == 0 {
            break;
        }
    }

    writer.write_all(&buf[..len])
}

/// Number of bytes [`write_vuint`] emits for `value`.
pub fn vuint_size(value: u32) -> usize {
    if value == 0 {
        1
    } else {
        (32 - value.leading_zeros()).div_ceil(7) as usize
    }
}

/// Read a length-prefixed UTF-8 string of at most `max_len` bytes.
pub fn read_string<R: Read + ?Sized>(reader: &mut R, max_len: usize) -> io::Result<String> {
    let len = read_vuint(reader)? as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string length {len} exceeds limit {max_len}"),
        ));
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a length-prefixed UTF-8 string.
pub fn write_string<W: Write + ?Sized>(writer: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes is too long to encode", value.len()),
        )
    })?;
    write_vuint(writer, len)?;
    writer.write_all(value.as_bytes())
}

/// Encoded size of a length-prefixed string.
pub fn string_size(value: &str) -> usize {
    vuint_size(value.len() as u32) + value.len()
}

/// `binrw` wrapper for a `vuint`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarUInt(pub u32);

impl BinRead for VarUInt {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        Ok(Self(read_vuint(reader)?))
    }
}

impl BinWrite for VarUInt {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_vuint(writer, self.0)?;
        Ok(())
    }
}

/// `binrw` wrapper for a length-prefixed name.
///
/// Reads reject anything longer than [`MAX_NAME_LEN`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PrefixedString(pub String);

impl BinRead for PrefixedString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        Ok(Self(read_string(reader, MAX_NAME_LEN)?))
    }
}

impl BinWrite for PrefixedString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_string(writer, &self.0)?;
        Ok(())
    }
}

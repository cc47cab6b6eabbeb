//! Sub-range views over a container's shared physical stream.

use crate::store::{BufferedInput, IndexInput, RandomRead};
use crate::{Result, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;

/// The container's physical stream, shared by every sub-range.
///
/// All access seeks and reads under one mutex, so concurrent sub-ranges
/// never observe each other's cursor.
#[derive(Debug)]
pub(crate) struct SharedStream {
    name: String,
    stream: Mutex<Option<Box<dyn IndexInput>>>,
}

impl SharedStream {
    pub(crate) fn new(name: &str, stream: Box<dyn IndexInput>) -> Self {
        Self {
            name: name.to_string(),
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Read `buf.len()` bytes at absolute position `pos`.
    pub(crate) fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.stream.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| StoreError::ContainerClosed(self.name.clone()))?;
        stream.seek_to(pos)?;
        stream.read_bytes(buf)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Close the physical stream. Later calls do nothing.
    pub(crate) fn close(&self) -> Result<()> {
        let taken = self.stream.lock().take();
        match taken {
            Some(mut stream) => stream.close(),
            None => Ok(()),
        }
    }
}

/// One entry's byte range inside the shared stream.
///
/// Holds no resources of its own; closing it does nothing.
#[derive(Debug, Clone)]
pub struct SliceSource {
    base: Arc<SharedStream>,
    file_offset: u64,
    length: u64,
}

impl SliceSource {
    pub(crate) const fn new(base: Arc<SharedStream>, file_offset: u64, length: u64) -> Self {
        Self {
            base,
            file_offset,
            length,
        }
    }

    /// Absolute position of the range inside the container.
    pub const fn file_offset(&self) -> u64 {
        self.file_offset
    }
}

impl RandomRead for SliceSource {
    fn read_internal(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let requested = buf.len() as u64;
        if pos.saturating_add(requested) > self.length {
            return Err(StoreError::EndOfFile {
                position: pos,
                requested,
                length: self.length,
            });
        }
        self.base.read_at(self.file_offset + pos, buf)
    }

    fn length(&self) -> u64 {
        self.length
    }
}

/// Read stream over one logical file of a container.
pub type SubRangeInput = BufferedInput<SliceSource>;

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{Directory, RamDirectory};

    fn shared(data: &[u8]) -> Arc<SharedStream> {
        let dir = RamDirectory::new();
        dir.write_file("phys", data).expect("write");
        Arc::new(SharedStream::new(
            "phys",
            dir.open_input("phys").expect("open"),
        ))
    }

    #[test]
    fn test_positions_are_translated() {
        let base = shared(b"headerPAYLOADtrailer");
        let mut input = SubRangeInput::new(SliceSource::new(base, 6, 7), 4);

        assert_eq!(input.length(), 7);
        let mut buf = [0u8; 7];
        input.read_bytes(&mut buf).expect("read");
        assert_eq!(&buf, b"PAYLOAD");
        assert_eq!(input.source().file_offset(), 6);
    }

    #[test]
    fn test_reads_stop_at_range_end() {
        let base = shared(b"0123456789");
        let mut input = SubRangeInput::new(SliceSource::new(base, 2, 3), 16);

        input.seek_to(2).expect("seek");
        let mut two = [0u8; 2];
        let err = input.read_bytes(&mut two).expect_err("past range");
        assert!(matches!(err, StoreError::EndOfFile { length: 3, .. }));

        input.seek_to(2).expect("seek");
        assert_eq!(input.read_byte().expect("last byte"), b'4');
    }

    #[test]
    fn test_out_of_range_fails_before_touching_base() {
        let base = shared(b"abc");
        base.close().expect("close base");
        let source = SliceSource::new(base, 0, 3);

        let mut buf = [0u8; 4];
        assert!(matches!(
            source.read_internal(0, &mut buf),
            Err(StoreError::EndOfFile { .. })
        ));
        assert!(matches!(
            source.read_internal(0, &mut buf[..1]),
            Err(StoreError::ContainerClosed(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let base = shared(b"abc");
        assert!(base.is_open());
        base.close().expect("first close");
        base.close().expect("second close");
        assert!(!base.is_open());
    }
}

//! Seekable byte-source abstraction and little-endian integer reads.
//!
//! The decoders never hold a whole container in memory; they ask a
//! [`TapeSource`] for small ranges at explicit offsets. Anything
//! `Read + Seek` qualifies, so production code hands in a `std::fs::File`
//! and tests hand in a `Cursor<Vec<u8>>`.

use crate::{Result, TapeError};
use std::io::{Read, Seek, SeekFrom};

/// A random-access byte source a tape container is decoded from.
pub trait TapeSource {
    /// Total length of the source in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Whether the source is empty.
    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `offset`. Short sources yield
    /// [`TapeError::UnexpectedEof`]; the buffer contents are then
    /// unspecified and must not be used.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<T: Read + Seek> TapeSource for T {
    fn len(&mut self) -> Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TapeError::UnexpectedEof
            } else {
                TapeError::Io(e)
            }
        })
    }
}

/// Read one byte at `offset`.
pub fn read_u8<S: TapeSource + ?Sized>(source: &mut S, offset: u64) -> Result<u8> {
    let mut buf = [0u8; 1];
    source.read_at(offset, &mut buf)?;
    Ok(buf[0])
}

/// Read a little-endian u16 at `offset`.
pub fn read_u16_le<S: TapeSource + ?Sized>(source: &mut S, offset: u64) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_at(offset, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read a little-endian 3-byte unsigned integer at `offset`.
pub fn read_u24_le<S: TapeSource + ?Sized>(source: &mut S, offset: u64) -> Result<u32> {
    let mut buf = [0u8; 3];
    source.read_at(offset, &mut buf)?;
    Ok(u32::from(buf[0]) | u32::from(buf[1]) << 8 | u32::from(buf[2]) << 16)
}

/// Read a little-endian u32 at `offset`.
pub fn read_u32_le<S: TapeSource + ?Sized>(source: &mut S, offset: u64) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_at(offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read `len` bytes at `offset` into a fresh vector.
pub fn read_range<S: TapeSource + ?Sized>(source: &mut S, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    source.read_at(offset, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(bytes: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(bytes.to_vec())
    }

    #[test]
    fn test_read_widths() {
        let mut src = source(&[0x01, 0x02, 0x03, 0x04, 0x05]);

        assert_eq!(read_u8(&mut src, 0).unwrap(), 0x01);
        assert_eq!(read_u16_le(&mut src, 0).unwrap(), 0x0201);
        assert_eq!(read_u24_le(&mut src, 0).unwrap(), 0x030201);
        assert_eq!(read_u32_le(&mut src, 0).unwrap(), 0x04030201);
        assert_eq!(read_u32_le(&mut src, 1).unwrap(), 0x05040302);
    }

    #[test]
    fn test_read_at_arbitrary_offset() {
        let mut src = source(&[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(read_u16_le(&mut src, 2).unwrap(), 0xDDCC);
    }

    #[test]
    fn test_short_read_is_eof_error() {
        let mut src = source(&[0x01, 0x02]);
        let err = read_u32_le(&mut src, 0).unwrap_err();
        assert!(matches!(err, TapeError::UnexpectedEof));

        let err = read_u8(&mut src, 10).unwrap_err();
        assert!(matches!(err, TapeError::UnexpectedEof));
    }

    #[test]
    fn test_len_preserves_position() {
        let mut src = source(&[0u8; 16]);
        assert_eq!(read_u8(&mut src, 7).unwrap(), 0);
        assert_eq!(TapeSource::len(&mut src).unwrap(), 16);
        // Position-independent reads still work after a len query
        assert_eq!(read_u8(&mut src, 15).unwrap(), 0);
    }

    #[test]
    fn test_read_range() {
        let mut src = source(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(read_range(&mut src, 2, 3).unwrap(), vec![3, 4, 5]);
        assert!(read_range(&mut src, 4, 3).is_err());
    }
}

//! Endian-aware field access and positioned I/O.
//!
//! Every multi-byte field in an image is read and written through an
//! [`Endian`] tag taken from the enclosing header's magic, so the same code
//! path handles native and byte-swapped images regardless of host order.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of the fields inside an image or fat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[inline]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline]
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(buf),
            Endian::Big => BigEndian::read_u64(buf),
        }
    }

    #[inline]
    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, value),
            Endian::Big => BigEndian::write_u32(buf, value),
        }
    }

    #[inline]
    pub fn write_u64(self, buf: &mut [u8], value: u64) {
        match self {
            Endian::Little => LittleEndian::write_u64(buf, value),
            Endian::Big => BigEndian::write_u64(buf, value),
        }
    }

    /// Reads the u32 field at `offset` within `buf`.
    #[inline]
    pub fn u32_at(self, buf: &[u8], offset: usize) -> u32 {
        self.read_u32(&buf[offset..offset + 4])
    }

    #[inline]
    pub fn set_u32_at(self, buf: &mut [u8], offset: usize, value: u32) {
        self.write_u32(&mut buf[offset..offset + 4], value)
    }

    #[inline]
    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        let mut raw = [0u8; 4];
        self.write_u32(&mut raw, value);
        raw
    }
}

/// Reads exactly `buf.len()` bytes starting at absolute position `pos`.
pub fn read_at<S: Read + Seek>(io: &mut S, pos: u64, buf: &mut [u8]) -> io::Result<()> {
    io.seek(SeekFrom::Start(pos))?;
    io.read_exact(buf)
}

/// Writes all of `buf` starting at absolute position `pos`.
pub fn write_at<S: Write + Seek>(io: &mut S, pos: u64, buf: &[u8]) -> io::Result<()> {
    io.seek(SeekFrom::Start(pos))?;
    io.write_all(buf)
}

/// Overwrites `len` bytes at `pos` with zeros.
pub fn zero_at<S: Write + Seek>(io: &mut S, pos: u64, len: u64) -> io::Result<()> {
    const CHUNK: usize = 0x4000;
    let zeros = [0u8; CHUNK];

    io.seek(SeekFrom::Start(pos))?;
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK as u64) as usize;
        io.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_u32_both_orders() {
        let raw = [0xfe, 0xed, 0xfa, 0xcf];
        assert_eq!(Endian::Big.read_u32(&raw), 0xfeedfacf);
        assert_eq!(Endian::Little.read_u32(&raw), 0xcffaedfe);
    }

    #[test]
    fn test_encode_u32_swaps_only_for_big() {
        assert_eq!(Endian::Little.encode_u32(0x0c), [0x0c, 0, 0, 0]);
        assert_eq!(Endian::Big.encode_u32(0x0c), [0, 0, 0, 0x0c]);
    }

    #[test]
    fn test_u64_fields() {
        let mut raw = [0u8; 8];
        Endian::Big.write_u64(&mut raw, 0x1122_3344_5566_7788);
        assert_eq!(raw[0], 0x11);
        assert_eq!(Endian::Big.read_u64(&raw), 0x1122_3344_5566_7788);
        assert_eq!(Endian::Little.read_u64(&raw), 0x8877_6655_4433_2211);
    }

    #[test]
    fn test_positioned_io() {
        let mut io = Cursor::new(vec![0xffu8; 0x10]);
        write_at(&mut io, 4, &[1, 2, 3]).unwrap();
        zero_at(&mut io, 8, 4).unwrap();

        let mut buf = [0u8; 8];
        read_at(&mut io, 4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 0xff, 0, 0, 0, 0]);
        assert_eq!(io.get_ref()[12], 0xff);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut io = Cursor::new(vec![0u8; 4]);
        let mut buf = [0u8; 8];
        assert!(read_at(&mut io, 0, &mut buf).is_err());
    }
}

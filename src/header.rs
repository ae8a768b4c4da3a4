//! Mach-O header model.

use std::io::{Read, Seek, Write};

use crate::codec::{read_at, write_at, Endian};
use crate::error::{Error, Result};
use crate::ffi::{mach_header, MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};

/// Bit width and byte order of one image, derived from its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachKind {
    pub is_64: bool,
    pub endian: Endian,
}

impl MachKind {
    /// Classifies the first four bytes of an image.
    pub fn classify(raw: [u8; 4]) -> Result<Self> {
        let kind = |is_64: bool, endian: Endian| -> Result<Self> { Ok(Self { is_64, endian }) };
        match u32::from_le_bytes(raw) {
            MH_MAGIC => kind(false, Endian::Little),
            MH_CIGAM => kind(false, Endian::Big),
            MH_MAGIC_64 => kind(true, Endian::Little),
            MH_CIGAM_64 => kind(true, Endian::Big),
            magic => Err(Error::UnknownFormat { magic }),
        }
    }

    /// Size of the header, and thus the offset of the command table.
    #[inline]
    pub fn header_size(&self) -> u64 {
        if self.is_64 {
            mach_header::SIZE_64
        } else {
            mach_header::SIZE_32
        }
    }

    pub fn describe(&self) -> &'static str {
        match (self.is_64, self.endian) {
            (true, Endian::Little) => "64-bit Mach-O",
            (true, Endian::Big) => "64-bit big-endian Mach-O",
            (false, Endian::Little) => "32-bit Mach-O",
            (false, Endian::Big) => "32-bit big-endian Mach-O",
        }
    }
}

/// Decoded `mach_header` fields. CPU and file type are carried through
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    pub kind: MachKind,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        let kind = MachKind::classify(magic)?;
        let e = kind.endian;

        Ok(Self {
            kind,
            cputype: e.u32_at(raw, mach_header::CPUTYPE),
            cpusubtype: e.u32_at(raw, mach_header::CPUSUBTYPE),
            filetype: e.u32_at(raw, mach_header::FILETYPE),
            ncmds: e.u32_at(raw, mach_header::NCMDS),
            sizeofcmds: e.u32_at(raw, mach_header::SIZEOFCMDS),
            flags: e.u32_at(raw, mach_header::FLAGS),
        })
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.kind.endian
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.kind.header_size()
    }
}

/// A bounded view of one image within a file.
///
/// Positions handed to the image are relative to its start; every access
/// is checked against `len` so that a slice of a fat file can never reach
/// into its neighbours.
#[derive(Debug, Clone)]
pub struct Image {
    pub offset: u64,
    pub len: u64,
    pub header: MachHeader,
}

impl Image {
    /// Reads and classifies the header of the image at `offset`.
    pub fn open<S: Read + Seek>(io: &mut S, offset: u64, len: u64) -> Result<Self> {
        let mut raw = [0u8; mach_header::SIZE_32 as usize];
        if len < raw.len() as u64 {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: raw.len() as u64,
                limit: len,
            });
        }
        read_at(io, offset, &mut raw)?;

        let image = Self {
            offset,
            len,
            header: MachHeader::parse(&raw)?,
        };
        image.span(0, image.header.size())?;
        Ok(image)
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.header.endian()
    }

    /// Image-relative offset of the first load command.
    #[inline]
    pub fn commands_start(&self) -> u64 {
        self.header.size()
    }

    /// Image-relative offset just past the last load command.
    #[inline]
    pub fn commands_end(&self) -> u64 {
        self.commands_start() + self.header.sizeofcmds as u64
    }

    /// Translates an image-relative range into an absolute file position.
    pub fn span(&self, rel: u64, len: u64) -> Result<u64> {
        match rel.checked_add(len) {
            Some(end) if end <= self.len => Ok(self.offset + rel),
            _ => Err(Error::OutOfBounds {
                offset: rel,
                len,
                limit: self.len,
            }),
        }
    }

    pub fn read<S: Read + Seek>(&self, io: &mut S, rel: u64, buf: &mut [u8]) -> Result<()> {
        let pos = self.span(rel, buf.len() as u64)?;
        read_at(io, pos, buf)?;
        Ok(())
    }

    pub fn write<S: Write + Seek>(&self, io: &mut S, rel: u64, buf: &[u8]) -> Result<()> {
        let pos = self.span(rel, buf.len() as u64)?;
        write_at(io, pos, buf)?;
        Ok(())
    }

    /// Stores new command count and table size, re-encoded in the image's
    /// byte order.
    pub fn write_counts<S: Write + Seek>(
        &mut self,
        io: &mut S,
        ncmds: u32,
        sizeofcmds: u32,
    ) -> Result<()> {
        let e = self.endian();
        let mut raw = [0u8; 8];
        e.set_u32_at(&mut raw, 0, ncmds);
        e.set_u32_at(&mut raw, 4, sizeofcmds);
        self.write(io, mach_header::NCMDS as u64, &raw)?;

        self.header.ncmds = ncmds;
        self.header.sizeofcmds = sizeofcmds;
        Ok(())
    }
}

//! Synthetic Mach-O images for the integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::ops::ControlFlow;

use insert_dylib::codec::Endian;
use insert_dylib::ffi::{
    is_dylib_dependency, LC_CODE_SIGNATURE, LC_SEGMENT, LC_SEGMENT_64, MH_CIGAM, MH_CIGAM_64,
    MH_MAGIC, MH_MAGIC_64,
};
use insert_dylib::walker::dylib_name;
use insert_dylib::{for_each_command, Image, MachHeader};

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;

/// Builds an image of `len` bytes: header, the given commands back to back,
/// zero slack, then section content and an optional signature blob.
pub struct ImageBuilder {
    is_64: bool,
    endian: Endian,
    len: usize,
    cputype: u32,
    commands: Vec<Vec<u8>>,
    content: Vec<(usize, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new(is_64: bool, endian: Endian, len: usize) -> Self {
        Self {
            is_64,
            endian,
            len,
            cputype: CPU_TYPE_X86_64,
            commands: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn header_size(&self) -> usize {
        if self.is_64 {
            32
        } else {
            28
        }
    }

    pub fn cputype(mut self, cputype: u32) -> Self {
        self.cputype = cputype;
        self
    }

    /// An opaque command of `size` bytes.
    pub fn command(mut self, cmd: u32, size: u32) -> Self {
        let mut raw = vec![0u8; size as usize];
        self.endian.set_u32_at(&mut raw, 0, cmd);
        self.endian.set_u32_at(&mut raw, 4, size);
        self.commands.push(raw);
        self
    }

    pub fn dylib(mut self, cmd: u32, path: &str) -> Self {
        let slot = (path.len() & !3) + 4;
        let size = 24 + slot;
        let mut raw = vec![0u8; size];
        self.endian.set_u32_at(&mut raw, 0, cmd);
        self.endian.set_u32_at(&mut raw, 4, size as u32);
        self.endian.set_u32_at(&mut raw, 8, 24);
        self.endian.set_u32_at(&mut raw, 16, 0x0001_0000);
        raw[24..24 + path.len()].copy_from_slice(path.as_bytes());
        self.commands.push(raw);
        self
    }

    /// A `__TEXT` segment with one `__text` section whose content starts at
    /// `section_offset` and is filled with non-zero bytes.
    pub fn text_segment(mut self, section_offset: u32) -> Self {
        let (cmd, seg_size, sect_size, nsects_at, offset_at) = if self.is_64 {
            (LC_SEGMENT_64, 72, 80, 64, 48)
        } else {
            (LC_SEGMENT, 56, 68, 48, 40)
        };
        let size = seg_size + sect_size;
        let mut raw = vec![0u8; size];
        self.endian.set_u32_at(&mut raw, 0, cmd);
        self.endian.set_u32_at(&mut raw, 4, size as u32);
        raw[8..14].copy_from_slice(b"__TEXT");
        self.endian.set_u32_at(&mut raw, nsects_at, 1);
        raw[seg_size..seg_size + 6].copy_from_slice(b"__text");
        self.endian.set_u32_at(&mut raw, seg_size + offset_at, section_offset);
        self.commands.push(raw);

        self.content.push((section_offset as usize, vec![0xcc; 16]));
        self
    }

    pub fn code_signature(mut self, dataoff: u32, datasize: u32) -> Self {
        let mut raw = vec![0u8; 16];
        self.endian.set_u32_at(&mut raw, 0, LC_CODE_SIGNATURE);
        self.endian.set_u32_at(&mut raw, 4, 16);
        self.endian.set_u32_at(&mut raw, 8, dataoff);
        self.endian.set_u32_at(&mut raw, 12, datasize);
        self.commands.push(raw);

        self.content.push((dataoff as usize, vec![0xab; datasize as usize]));
        self
    }

    /// Non-zero bytes at an arbitrary position.
    pub fn bytes_at(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.content.push((offset, bytes.to_vec()));
        self
    }

    pub fn table_size(&self) -> usize {
        self.commands.iter().map(Vec::len).sum()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut raw = vec![0u8; self.len];
        let magic = match (self.is_64, self.endian) {
            (true, Endian::Little) => MH_MAGIC_64,
            (true, Endian::Big) => MH_CIGAM_64,
            (false, Endian::Little) => MH_MAGIC,
            (false, Endian::Big) => MH_CIGAM,
        };
        raw[..4].copy_from_slice(&magic.to_le_bytes());

        let e = self.endian;
        e.set_u32_at(&mut raw, 4, self.cputype);
        e.set_u32_at(&mut raw, 8, 3);
        e.set_u32_at(&mut raw, 12, 2);
        e.set_u32_at(&mut raw, 16, self.commands.len() as u32);
        e.set_u32_at(&mut raw, 20, self.table_size() as u32);
        e.set_u32_at(&mut raw, 24, 0x0020_0085);

        let mut offset = self.header_size();
        for command in &self.commands {
            raw[offset..offset + command.len()].copy_from_slice(command);
            offset += command.len();
        }

        for (at, bytes) in &self.content {
            raw[*at..*at + bytes.len()].copy_from_slice(bytes);
        }
        raw
    }
}

/// Wraps images into a fat file with a big-endian 32-bit arch table, each
/// slice starting on a 0x1000 boundary.
pub fn fat(images: &[Vec<u8>]) -> (Vec<u8>, Vec<u64>) {
    const ALIGN: usize = 0x1000;
    let mut raw = vec![0u8; ALIGN];
    let e = Endian::Big;
    e.set_u32_at(&mut raw, 0, 0xcafebabe);
    e.set_u32_at(&mut raw, 4, images.len() as u32);

    let mut offsets = Vec::new();
    for (i, image) in images.iter().enumerate() {
        let offset = raw.len();
        let cputype = Endian::Little.u32_at(image, 4);
        let entry = 8 + i * 20;
        e.set_u32_at(&mut raw, entry, cputype);
        e.set_u32_at(&mut raw, entry + 8, offset as u32);
        e.set_u32_at(&mut raw, entry + 12, image.len() as u32);
        e.set_u32_at(&mut raw, entry + 16, 12);

        raw.extend_from_slice(image);
        let padded = (raw.len() + ALIGN - 1) / ALIGN * ALIGN;
        raw.resize(padded, 0);
        offsets.push(offset as u64);
    }
    (raw, offsets)
}

pub fn header(raw: &[u8], offset: usize) -> MachHeader {
    MachHeader::parse(&raw[offset..offset + 28]).unwrap()
}

/// Every dylib dependency of the image at `offset`, as (cmd, path).
pub fn dylibs(raw: &[u8], offset: u64, len: u64) -> Vec<(u32, String)> {
    let mut io = Cursor::new(raw.to_vec());
    let image = Image::open(&mut io, offset, len).unwrap();

    let mut found = Vec::new();
    for_each_command(&mut io, &image, |handle| {
        if is_dylib_dependency(handle.command.cmd) {
            let body = handle.body()?;
            let name = dylib_name(handle.endian(), &body).unwrap();
            found.push((handle.command.cmd, String::from_utf8(name.to_vec()).unwrap()));
        }
        Ok(ControlFlow::Continue(()))
    })
    .unwrap();
    found
}

/// Command types of the image at `offset`, in table order.
pub fn command_types(raw: &[u8], offset: u64, len: u64) -> Vec<u32> {
    let mut io = Cursor::new(raw.to_vec());
    let image = Image::open(&mut io, offset, len).unwrap();
    insert_dylib::load_commands(&mut io, &image)
        .unwrap()
        .iter()
        .map(|c| c.cmd)
        .collect()
}

//! Fat (universal) binaries: one image per architecture behind a shared
//! arch table. Each slice is patched on its own, and a failing slice never
//! stops the others.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use crate::codec::{read_at, Endian};
use crate::confirm::Confirm;
use crate::error::{Error, Result};
use crate::ffi::{cpu_name, FatArch, FatHeader, FAT_CIGAM, FAT_CIGAM_64, FAT_MAGIC, FAT_MAGIC_64};
use crate::header::MachKind;
use crate::insert::{insert_dylib, InsertOptions, Outcome};

/// Reads the arch table of a fat file of `file_len` bytes.
///
/// Returns `Ok(None)` if the file does not start with a fat magic, in which
/// case it should be treated as a single image at offset 0.
pub fn split<S: Read + Seek>(io: &mut S, file_len: u64) -> Result<Option<Vec<FatArch>>> {
    if file_len < FatHeader::SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; FatHeader::SIZE as usize];
    read_at(io, 0, &mut raw)?;

    let (endian, is_64) = match u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) {
        FAT_CIGAM => (Endian::Big, false),
        FAT_MAGIC => (Endian::Little, false),
        FAT_CIGAM_64 => (Endian::Big, true),
        FAT_MAGIC_64 => (Endian::Little, true),
        _ => return Ok(None),
    };
    let header = FatHeader {
        magic: endian.u32_at(&raw, 0),
        nfat_arch: endian.u32_at(&raw, 4),
    };
    debug!("fat header {:#x} with {} archs", header.magic, header.nfat_arch);

    if header.nfat_arch == 0 {
        return Err(Error::malformed_archive("no architectures"));
    }

    let entry_size = if is_64 { FatArch::SIZE_64 } else { FatArch::SIZE_32 };
    let table_end = FatHeader::SIZE + header.nfat_arch as u64 * entry_size;
    if table_end > file_len {
        return Err(Error::malformed_archive(format!(
            "{} arch entries do not fit in {:#x} bytes",
            header.nfat_arch, file_len
        )));
    }

    let mut table = vec![0u8; (table_end - FatHeader::SIZE) as usize];
    read_at(io, FatHeader::SIZE, &mut table)?;
    let archs: Vec<FatArch> = table
        .chunks_exact(entry_size as usize)
        .map(|entry| FatArch::parse(endian, entry, is_64))
        .collect();

    for (i, arch) in archs.iter().enumerate() {
        let end = arch.offset.checked_add(arch.size);
        if arch.offset < table_end || end.map_or(true, |end| end > file_len) {
            return Err(Error::malformed_archive(format!(
                "arch #{} at {:#x}+{:#x} lies outside the file",
                i + 1,
                arch.offset,
                arch.size
            )));
        }
    }

    let mut ranges: Vec<(u64, u64)> = archs.iter().map(|a| (a.offset, a.offset + a.size)).collect();
    ranges.sort_unstable();
    if ranges.windows(2).any(|pair| pair[0].1 > pair[1].0) {
        return Err(Error::malformed_archive("arch slices overlap"));
    }

    Ok(Some(archs))
}

/// Result of patching one slice.
#[derive(Debug)]
pub struct SliceReport {
    pub index: usize,
    /// `None` for a thin file.
    pub arch: Option<FatArch>,
    /// Format read from the slice's magic, if it is a Mach-O image.
    pub kind: Option<MachKind>,
    pub result: Result<Outcome>,
}

impl SliceReport {
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn arch_name(&self) -> Option<&'static str> {
        self.arch.map(|a| cpu_name(a.cputype, a.cpusubtype))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    AllSucceeded,
    Partial { succeeded: usize, total: usize },
    AllFailed,
}

#[derive(Debug)]
pub struct Report {
    pub fat: bool,
    pub slices: Vec<SliceReport>,
}

impl Report {
    pub fn summary(&self) -> Summary {
        let total = self.slices.len();
        let succeeded = self.slices.iter().filter(|s| s.succeeded()).count();
        match succeeded {
            n if n == total => Summary::AllSucceeded,
            0 => Summary::AllFailed,
            succeeded => Summary::Partial { succeeded, total },
        }
    }
}

impl Summary {
    /// Process exit status: 0 when every slice succeeded, 2 on partial
    /// success and 1 when nothing was patched.
    pub fn exit_code(self) -> u8 {
        match self {
            Summary::AllSucceeded => 0,
            Summary::Partial { .. } => 2,
            Summary::AllFailed => 1,
        }
    }
}

fn slice_kind<S: Read + Seek>(io: &mut S, offset: u64, len: u64) -> Option<MachKind> {
    let mut magic = [0u8; 4];
    if len < magic.len() as u64 {
        return None;
    }
    read_at(io, offset, &mut magic).ok()?;
    MachKind::classify(magic).ok()
}

/// Patches every image in the file: each slice of a fat binary, or the whole
/// file when it is a single image.
pub fn insert_into_file<S, C>(
    io: &mut S,
    dylib: &str,
    options: &InsertOptions,
    confirm: &mut C,
) -> Result<Report>
where
    S: Read + Write + Seek,
    C: Confirm + ?Sized,
{
    let file_len = io.seek(SeekFrom::End(0))?;

    if let Some(archs) = split(io, file_len)? {
        let slices = archs
            .into_iter()
            .enumerate()
            .map(|(index, arch)| {
                let kind = slice_kind(&mut *io, arch.offset, arch.size);
                let result =
                    insert_dylib(&mut *io, arch.offset, arch.size, dylib, options, &mut *confirm);
                if let Err(e) = &result {
                    warn!("failed to patch arch #{} at {:#x}: {}", index + 1, arch.offset, e);
                }
                SliceReport {
                    index,
                    arch: Some(arch),
                    kind,
                    result,
                }
            })
            .collect();
        return Ok(Report { fat: true, slices });
    }

    let mut magic = [0u8; 4];
    if file_len < magic.len() as u64 {
        return Err(Error::UnknownFormat { magic: 0 });
    }
    read_at(io, 0, &mut magic)?;
    let kind = MachKind::classify(magic)?;

    let result = insert_dylib(io, 0, file_len, dylib, options, confirm);
    Ok(Report {
        fat: false,
        slices: vec![SliceReport {
            index: 0,
            arch: None,
            kind: Some(kind),
            result,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{CPU_TYPE_ARM64, MH_MAGIC_64};
    use std::io::Cursor;

    fn fat_bytes(archs: &[(u64, u64)], len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; len];
        let e = Endian::Big;
        e.set_u32_at(&mut raw, 0, FAT_MAGIC);
        e.set_u32_at(&mut raw, 4, archs.len() as u32);
        for (i, &(offset, size)) in archs.iter().enumerate() {
            let at = 8 + i * 20;
            e.set_u32_at(&mut raw, at, CPU_TYPE_ARM64);
            e.set_u32_at(&mut raw, at + 8, offset as u32);
            e.set_u32_at(&mut raw, at + 12, size as u32);
            e.set_u32_at(&mut raw, at + 16, 14);
        }
        raw
    }

    #[test]
    fn test_split_thin_file() {
        let mut io = Cursor::new(MH_MAGIC_64.to_le_bytes().repeat(4));
        assert_eq!(split(&mut io, 16).unwrap(), None);
    }

    #[test]
    fn test_split_offsets() {
        let mut io = Cursor::new(fat_bytes(&[(0x1000, 0x800), (0x2000, 0x800)], 0x2800));
        let archs = split(&mut io, 0x2800).unwrap().unwrap();
        let offsets: Vec<u64> = archs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0x1000, 0x2000]);
        assert_eq!(cpu_name(archs[0].cputype, archs[0].cpusubtype), "arm64");
    }

    #[test]
    fn test_split_rejects_overlap() {
        let mut io = Cursor::new(fat_bytes(&[(0x1000, 0x1800), (0x2000, 0x800)], 0x2800));
        assert!(matches!(split(&mut io, 0x2800), Err(Error::MalformedArchive { .. })));
    }

    #[test]
    fn test_split_rejects_truncated_slice() {
        let mut io = Cursor::new(fat_bytes(&[(0x1000, 0x2000)], 0x2000));
        assert!(matches!(split(&mut io, 0x2000), Err(Error::MalformedArchive { .. })));
    }

    #[test]
    fn test_split_rejects_empty_table() {
        let mut io = Cursor::new(fat_bytes(&[], 0x100));
        assert!(matches!(split(&mut io, 0x100), Err(Error::MalformedArchive { .. })));
    }

    #[test]
    fn test_split_fat64() {
        let mut raw = vec![0u8; 0x3000];
        let e = Endian::Big;
        e.set_u32_at(&mut raw, 0, FAT_MAGIC_64);
        e.set_u32_at(&mut raw, 4, 1);
        e.write_u64(&mut raw[16..24], 0x1000);
        e.write_u64(&mut raw[24..32], 0x2000);

        let mut io = Cursor::new(raw);
        let archs = split(&mut io, 0x3000).unwrap().unwrap();
        assert_eq!(archs[0].offset, 0x1000);
        assert_eq!(archs[0].size, 0x2000);
    }

    #[test]
    fn test_unknown_format() {
        let mut io = Cursor::new(b"\x7fELF\x02\x01\x01\x00".to_vec());
        let err = insert_into_file(
            &mut io,
            "/usr/lib/libz.dylib",
            &InsertOptions::default(),
            &mut crate::confirm::AutoAnswer::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownFormat { magic: 0x464c457f }));
    }

    #[test]
    fn test_summary() {
        let ok = |index| SliceReport {
            index,
            arch: None,
            kind: None,
            result: Ok(Outcome::Skipped),
        };
        let failed = |index| SliceReport {
            index,
            arch: None,
            kind: None,
            result: Err(Error::InsufficientSlackSpace { offset: 0, needed: 32 }),
        };

        let report = Report { fat: true, slices: vec![ok(0), ok(1)] };
        assert_eq!(report.summary(), Summary::AllSucceeded);
        let report = Report { fat: true, slices: vec![failed(0), ok(1)] };
        assert_eq!(report.summary(), Summary::Partial { succeeded: 1, total: 2 });
        let report = Report { fat: true, slices: vec![failed(0), failed(1)] };
        assert_eq!(report.summary(), Summary::AllFailed);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(Summary::AllSucceeded.exit_code(), 0);
        assert_eq!(Summary::AllFailed.exit_code(), 1);
        assert_eq!(Summary::Partial { succeeded: 1, total: 2 }.exit_code(), 2);
    }
}

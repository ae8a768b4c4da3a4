//! On-disk Mach-O record layouts and constants.
//!
//! Records are decoded from and encoded into raw bytes through an
//! [`Endian`] tag rather than reinterpreted in place, so the same structs
//! describe both byte orders.

use crate::codec::Endian;

pub const MH_MAGIC: u32 = 0xfeedface;
pub const MH_CIGAM: u32 = 0xcefaedfe;
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

pub const FAT_MAGIC: u32 = 0xcafebabe;
pub const FAT_CIGAM: u32 = 0xbebafeca;
pub const FAT_MAGIC_64: u32 = 0xcafebabf;
pub const FAT_CIGAM_64: u32 = 0xbfbafeca;

pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x01;
pub const LC_LOAD_DYLIB: u32 = 0x0c;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;

pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_POWERPC: u32 = 18;
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

pub const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;
pub const CPU_SUBTYPE_ARM_V7: u32 = 9;
pub const CPU_SUBTYPE_ARM_V7S: u32 = 11;
pub const CPU_SUBTYPE_ARM64E: u32 = 2;

pub const SECTION_TYPE: u32 = 0xff;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_GB_ZEROFILL: u32 = 0xc;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

/// Returns true for every command that makes dyld load another image.
pub fn is_dylib_dependency(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_LOAD_DYLIB
            | LC_LOAD_WEAK_DYLIB
            | LC_REEXPORT_DYLIB
            | LC_LAZY_LOAD_DYLIB
            | LC_LOAD_UPWARD_DYLIB
    )
}

/// Field offsets of `mach_header` / `mach_header_64`.
pub mod mach_header {
    pub const CPUTYPE: usize = 4;
    pub const CPUSUBTYPE: usize = 8;
    pub const FILETYPE: usize = 12;
    pub const NCMDS: usize = 16;
    pub const SIZEOFCMDS: usize = 20;
    pub const FLAGS: usize = 24;

    pub const SIZE_32: u64 = 28;
    /// The 64-bit header carries one extra reserved word.
    pub const SIZE_64: u64 = 32;
}

/// Generic `load_command` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandHeader {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommandHeader {
    pub const SIZE: u32 = 8;

    pub fn parse(endian: Endian, raw: &[u8]) -> Self {
        Self {
            cmd: endian.u32_at(raw, 0),
            cmdsize: endian.u32_at(raw, 4),
        }
    }
}

/// `dylib_command`: the record body preceding the inline path string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Offset of the path string from the start of the command.
    pub name: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

impl DylibCommand {
    pub const SIZE: u32 = 24;

    pub fn parse(endian: Endian, raw: &[u8]) -> Self {
        Self {
            cmd: endian.u32_at(raw, 0),
            cmdsize: endian.u32_at(raw, 4),
            name: endian.u32_at(raw, 8),
            timestamp: endian.u32_at(raw, 12),
            current_version: endian.u32_at(raw, 16),
            compatibility_version: endian.u32_at(raw, 20),
        }
    }

    pub fn to_bytes(&self, endian: Endian) -> [u8; Self::SIZE as usize] {
        let mut raw = [0u8; Self::SIZE as usize];
        endian.set_u32_at(&mut raw, 0, self.cmd);
        endian.set_u32_at(&mut raw, 4, self.cmdsize);
        endian.set_u32_at(&mut raw, 8, self.name);
        endian.set_u32_at(&mut raw, 12, self.timestamp);
        endian.set_u32_at(&mut raw, 16, self.current_version);
        endian.set_u32_at(&mut raw, 20, self.compatibility_version);
        raw
    }
}

/// `linkedit_data_command`, as used by `LC_CODE_SIGNATURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditDataCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub const SIZE: u32 = 16;

    pub fn parse(endian: Endian, raw: &[u8]) -> Self {
        Self {
            cmd: endian.u32_at(raw, 0),
            cmdsize: endian.u32_at(raw, 4),
            dataoff: endian.u32_at(raw, 8),
            datasize: endian.u32_at(raw, 12),
        }
    }
}

/// Layout of `segment_command` / `segment_command_64` and their sections,
/// reduced to the fields needed to find where section content starts.
#[derive(Debug, Clone, Copy)]
pub struct SegmentLayout {
    pub command_size: usize,
    pub nsects: usize,
    pub section_size: usize,
    pub section_offset: usize,
    pub section_flags: usize,
}

impl SegmentLayout {
    pub const SEGMENT_32: Self = Self {
        command_size: 56,
        nsects: 48,
        section_size: 68,
        section_offset: 40,
        section_flags: 56,
    };

    pub const SEGMENT_64: Self = Self {
        command_size: 72,
        nsects: 64,
        section_size: 80,
        section_offset: 48,
        section_flags: 64,
    };

    pub fn for_command(cmd: u32) -> Option<Self> {
        match cmd {
            LC_SEGMENT => Some(Self::SEGMENT_32),
            LC_SEGMENT_64 => Some(Self::SEGMENT_64),
            _ => None,
        }
    }

    /// Lowest file offset of section content in a raw segment command body.
    pub fn first_section_offset(&self, endian: Endian, body: &[u8]) -> Option<u32> {
        if body.len() < self.command_size {
            return None;
        }

        let nsects = endian.u32_at(body, self.nsects) as usize;
        (0..nsects)
            .map(|i| self.command_size + i * self.section_size)
            .take_while(|&start| start + self.section_size <= body.len())
            .filter_map(|start| {
                let section = &body[start..start + self.section_size];
                let kind = endian.u32_at(section, self.section_flags) & SECTION_TYPE;
                let offset = endian.u32_at(section, self.section_offset);
                let zerofill = matches!(kind, S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL);
                (!zerofill && offset != 0).then_some(offset)
            })
            .min()
    }
}

/// `fat_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatHeader {
    pub magic: u32,
    pub nfat_arch: u32,
}

impl FatHeader {
    pub const SIZE: u64 = 8;
}

/// One entry of the fat arch table, widened from either `fat_arch` or
/// `fat_arch_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
}

impl FatArch {
    pub const SIZE_32: u64 = 20;
    pub const SIZE_64: u64 = 32;

    pub fn parse(endian: Endian, raw: &[u8], is_64: bool) -> Self {
        if is_64 {
            Self {
                cputype: endian.u32_at(raw, 0),
                cpusubtype: endian.u32_at(raw, 4),
                offset: endian.read_u64(&raw[8..16]),
                size: endian.read_u64(&raw[16..24]),
                align: endian.u32_at(raw, 24),
            }
        } else {
            Self {
                cputype: endian.u32_at(raw, 0),
                cpusubtype: endian.u32_at(raw, 4),
                offset: endian.u32_at(raw, 8) as u64,
                size: endian.u32_at(raw, 12) as u64,
                align: endian.u32_at(raw, 16),
            }
        }
    }
}

/// Returns a display name for a CPU type/subtype pair.
pub fn cpu_name(cputype: u32, cpusubtype: u32) -> &'static str {
    let subtype = cpusubtype & !CPU_SUBTYPE_MASK;
    match cputype {
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_X86 => "i386",
        CPU_TYPE_ARM64 if subtype == CPU_SUBTYPE_ARM64E => "arm64e",
        CPU_TYPE_ARM64 => "arm64",
        CPU_TYPE_ARM if subtype == CPU_SUBTYPE_ARM_V7 => "armv7",
        CPU_TYPE_ARM if subtype == CPU_SUBTYPE_ARM_V7S => "armv7s",
        CPU_TYPE_ARM => "arm",
        CPU_TYPE_POWERPC64 => "ppc64",
        CPU_TYPE_POWERPC => "ppc",
        _ => "unknown",
    }
}

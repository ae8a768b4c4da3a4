//! Insertion of a dylib load command into a single image.
//!
//! The new command is written into the zero-filled space that linkers leave
//! between the end of the command table and the first section, so nothing
//! already in the image moves. All questions are answered before the first
//! byte is written: a declined conflict or slack check leaves the image as
//! it was.

use std::io::{Read, Seek, Write};
use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::codec::{zero_at, Endian};
use crate::confirm::{Confirm, Decision};
use crate::error::{Error, Result};
use crate::ffi::{
    is_dylib_dependency, DylibCommand, LinkeditDataCommand, SegmentLayout, LC_CODE_SIGNATURE,
    LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB,
};
use crate::header::Image;
use crate::walker::{dylib_name, for_each_command, LoadCommand};

/// What to do with a trailing `LC_CODE_SIGNATURE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StripSignature {
    Always,
    Never,
    #[default]
    Confirm,
}

/// Whether conflicts and occupied slack need a confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverwritePolicy {
    #[default]
    Confirm,
    Allow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Insert `LC_LOAD_WEAK_DYLIB` instead of `LC_LOAD_DYLIB`.
    pub weak: bool,
    pub strip_signature: StripSignature,
    pub overwrite: OverwritePolicy,
}

impl InsertOptions {
    #[inline]
    pub fn command(&self) -> u32 {
        if self.weak {
            LC_LOAD_WEAK_DYLIB
        } else {
            LC_LOAD_DYLIB
        }
    }

    pub fn command_name(&self) -> &'static str {
        if self.weak {
            "LC_LOAD_WEAK_DYLIB"
        } else {
            "LC_LOAD_DYLIB"
        }
    }
}

/// What happened to the image's code signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAction {
    Absent,
    /// Last in the table but left in place by policy.
    Kept,
    /// Not the last command, so it could not be removed. Only reported
    /// when there is no trailing signature; otherwise see
    /// [`Insertion::misplaced_signature`].
    NotLast,
    /// Command and blob zeroed.
    Stripped { dataoff: u32, datasize: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    /// Image-relative offset of the new command.
    pub offset: u64,
    /// Encoded command as written.
    pub command: Vec<u8>,
    /// Action taken on the trailing signature, if any.
    pub signature: SignatureAction,
    /// An `LC_CODE_SIGNATURE` was found before the end of the table and
    /// left untouched.
    pub misplaced_signature: bool,
}

impl Insertion {
    #[inline]
    pub fn cmdsize(&self) -> u32 {
        self.command.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Inserted(Insertion),
    /// The dylib was already loaded and the user chose not to add it again.
    Skipped,
}

/// Size of the path slot for `len` bytes: rounded to 4 with room for at
/// least one terminating NUL.
#[inline]
pub fn path_slot_size(len: usize) -> usize {
    (len & !3) + 4
}

/// Encodes a complete dylib command, path included.
pub fn encode_dylib_command(endian: Endian, cmd: u32, path: &[u8]) -> Result<Vec<u8>> {
    let too_large = || Error::CommandTooLarge { len: path.len() };
    let cmdsize = u32::try_from(path_slot_size(path.len()))
        .ok()
        .and_then(|slot| slot.checked_add(DylibCommand::SIZE))
        .ok_or_else(too_large)?;

    let header = DylibCommand {
        cmd,
        cmdsize,
        name: DylibCommand::SIZE,
        timestamp: 0,
        current_version: 0,
        compatibility_version: 0,
    };

    let mut raw = Vec::with_capacity(cmdsize as usize);
    raw.extend_from_slice(&header.to_bytes(endian));
    raw.extend_from_slice(path);
    raw.resize(cmdsize as usize, 0);
    Ok(raw)
}

/// Facts gathered from one pass over the existing commands.
#[derive(Debug, Default)]
struct Survey {
    declined_conflict: bool,
    signature: Option<(LoadCommand, LinkeditDataCommand)>,
    signature_not_last: bool,
    first_section: Option<u32>,
}

fn survey<S, C>(
    io: &mut S,
    image: &Image,
    dylib: &[u8],
    options: &InsertOptions,
    confirm: &mut C,
) -> Result<Survey>
where
    S: Read + Write + Seek,
    C: Confirm + ?Sized,
{
    let mut survey = Survey::default();

    for_each_command(io, image, |handle| {
        let command = handle.command;

        if is_dylib_dependency(command.cmd) {
            let body = handle.body()?;
            match dylib_name(handle.endian(), &body) {
                Some(name) if name == dylib => {
                    let proceed = options.overwrite == OverwritePolicy::Allow
                        || confirm.confirm(&Decision::ConflictingDependency {
                            path: String::from_utf8_lossy(dylib).into_owned(),
                        });
                    if !proceed {
                        survey.declined_conflict = true;
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Some(_) => {}
                None => debug!("load command #{} has no readable name", command.index),
            }
        } else if command.cmd == LC_CODE_SIGNATURE {
            if command.cmdsize < LinkeditDataCommand::SIZE {
                return Err(Error::MalformedCommand {
                    index: command.index,
                    offset: command.offset,
                    cmdsize: command.cmdsize,
                });
            }
            if handle.is_last() {
                let body = handle.body()?;
                let data = LinkeditDataCommand::parse(handle.endian(), &body);
                survey.signature = Some((command, data));
            } else {
                warn!("LC_CODE_SIGNATURE is not the last load command, so couldn't remove");
                survey.signature_not_last = true;
            }
        } else if let Some(layout) = SegmentLayout::for_command(command.cmd) {
            let body = handle.body()?;
            if let Some(offset) = layout.first_section_offset(handle.endian(), &body) {
                survey.first_section = Some(survey.first_section.map_or(offset, |o| o.min(offset)));
            }
        }

        Ok(ControlFlow::Continue(()))
    })?;

    Ok(survey)
}

/// Zeroes the part of `buf` (which starts at `buf_start`) that overlaps
/// `[start, start + len)`.
fn clear_overlap(buf: &mut [u8], buf_start: u64, start: u64, len: u64) {
    let lo = start.max(buf_start);
    let hi = (start + len).min(buf_start + buf.len() as u64);
    if lo < hi {
        buf[(lo - buf_start) as usize..(hi - buf_start) as usize].fill(0);
    }
}

/// Inserts a dylib load command into the image at `offset`, which extends
/// over `len` bytes of `io`.
///
/// Returns [`Outcome::Skipped`] when the dylib is already loaded and the
/// conflict was declined, and [`Error::InsufficientSlackSpace`] when the
/// space after the command table is unavailable or its use was declined.
pub fn insert_dylib<S, C>(
    io: &mut S,
    offset: u64,
    len: u64,
    dylib: &str,
    options: &InsertOptions,
    confirm: &mut C,
) -> Result<Outcome>
where
    S: Read + Write + Seek,
    C: Confirm + ?Sized,
{
    let mut image = Image::open(io, offset, len)?;
    let endian = image.endian();
    debug!(
        "{} at {:#x}: {} commands, {:#x} bytes",
        image.header.kind.describe(),
        offset,
        image.header.ncmds,
        image.header.sizeofcmds
    );

    let survey = survey(io, &image, dylib.as_bytes(), options, confirm)?;
    if survey.declined_conflict {
        info!("{} is already loaded, skipping image at {:#x}", dylib, offset);
        return Ok(Outcome::Skipped);
    }

    let mut ncmds = image.header.ncmds;
    let mut sizeofcmds = image.header.sizeofcmds;

    let strip = match survey.signature {
        Some(_) => match options.strip_signature {
            StripSignature::Always => true,
            StripSignature::Never => false,
            StripSignature::Confirm => confirm.confirm(&Decision::StripSignature),
        },
        None => false,
    };

    let stripped = match survey.signature {
        Some((command, data)) if strip => {
            image.span(data.dataoff as u64, data.datasize as u64)?;
            ncmds -= 1;
            sizeofcmds -= command.cmdsize;
            Some((command, data))
        }
        _ => None,
    };

    let command = encode_dylib_command(endian, options.command(), dylib.as_bytes())?;
    let cmdsize = command.len() as u32;
    let table_end = image.commands_start() + sizeofcmds as u64;

    let no_space = Error::InsufficientSlackSpace {
        offset: table_end,
        needed: cmdsize,
    };
    if image.span(table_end, cmdsize as u64).is_err() {
        return Err(no_space);
    }

    let mut slack = vec![0u8; cmdsize as usize];
    image.read(io, table_end, &mut slack)?;
    if let Some((lc, data)) = stripped {
        clear_overlap(&mut slack, table_end, lc.offset, lc.cmdsize as u64);
        clear_overlap(&mut slack, table_end, data.dataoff as u64, data.datasize as u64);
    }

    let past_first_section = survey
        .first_section
        .is_some_and(|first| table_end + cmdsize as u64 > first as u64);
    if past_first_section || slack.iter().any(|&b| b != 0) {
        warn!(
            "{} bytes at {:#x} are not empty, inserting would overwrite image content",
            cmdsize, table_end
        );
        let proceed = options.overwrite == OverwritePolicy::Allow
            || confirm.confirm(&Decision::OccupiedSlack {
                offset: table_end,
                len: cmdsize,
            });
        if !proceed {
            return Err(no_space);
        }
    }

    let signature = match (stripped, survey.signature) {
        (Some((lc, data)), _) => {
            zero_at(io, image.span(lc.offset, lc.cmdsize as u64)?, lc.cmdsize as u64)?;
            zero_at(
                io,
                image.span(data.dataoff as u64, data.datasize as u64)?,
                data.datasize as u64,
            )?;
            info!(
                "removed LC_CODE_SIGNATURE and {:#x} bytes of signature data at {:#x}",
                data.datasize, data.dataoff
            );
            SignatureAction::Stripped {
                dataoff: data.dataoff,
                datasize: data.datasize,
            }
        }
        (None, Some(_)) => SignatureAction::Kept,
        (None, None) if survey.signature_not_last => SignatureAction::NotLast,
        (None, None) => SignatureAction::Absent,
    };

    image.write(io, table_end, &command)?;
    image.write_counts(io, ncmds + 1, sizeofcmds + cmdsize)?;

    info!(
        "added {} for {} at {:#x} ({} bytes)",
        options.command_name(),
        dylib,
        image.offset + table_end,
        cmdsize
    );

    Ok(Outcome::Inserted(Insertion {
        offset: table_end,
        command,
        signature,
        misplaced_signature: survey.signature_not_last,
    }))
}

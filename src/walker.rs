//! Sequential walk over an image's load command table.

use std::io::{Read, Seek, Write};
use std::ops::ControlFlow;

use tracing::debug;

use crate::codec::{zero_at, Endian};
use crate::error::{Error, Result};
use crate::ffi::{DylibCommand, LoadCommandHeader};
use crate::header::Image;

/// Position and prefix of one load command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommand {
    pub index: u32,
    /// Image-relative offset of the command.
    pub offset: u64,
    pub cmd: u32,
    pub cmdsize: u32,
}

/// Access to the command currently visited by [`for_each_command`].
pub struct CommandHandle<'a, S> {
    io: &'a mut S,
    image: &'a Image,
    pub command: LoadCommand,
}

impl<S: Read + Write + Seek> CommandHandle<'_, S> {
    #[inline]
    pub fn endian(&self) -> Endian {
        self.image.endian()
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.command.index + 1 == self.image.header.ncmds
    }

    /// Reads the whole command, `cmdsize` bytes.
    pub fn body(&mut self) -> Result<Vec<u8>> {
        let mut raw = vec![0u8; self.command.cmdsize as usize];
        self.image.read(&mut *self.io, self.command.offset, &mut raw)?;
        Ok(raw)
    }

    /// Rewrites the command in place. The replacement must have exactly the
    /// declared size, so later commands never move.
    pub fn overwrite(&mut self, raw: &[u8]) -> Result<()> {
        if raw.len() != self.command.cmdsize as usize {
            return Err(self.malformed());
        }
        self.image.write(&mut *self.io, self.command.offset, raw)
    }

    pub fn zero(&mut self) -> Result<()> {
        let len = self.command.cmdsize as u64;
        let pos = self.image.span(self.command.offset, len)?;
        zero_at(&mut *self.io, pos, len)?;
        Ok(())
    }

    fn malformed(&self) -> Error {
        Error::MalformedCommand {
            index: self.command.index,
            offset: self.command.offset,
            cmdsize: self.command.cmdsize,
        }
    }
}

/// Visits each of the image's `ncmds` commands in table order.
///
/// The walk always advances by the declared `cmdsize`, whatever the visitor
/// did with the command. A size smaller than a command prefix, or one that
/// runs past `sizeofcmds`, aborts with [`Error::MalformedCommand`].
pub fn for_each_command<S, F>(io: &mut S, image: &Image, mut visit: F) -> Result<()>
where
    S: Read + Write + Seek,
    F: FnMut(&mut CommandHandle<'_, S>) -> Result<ControlFlow<()>>,
{
    let end = image.commands_end();
    image.span(image.commands_start(), image.header.sizeofcmds as u64)?;

    let mut offset = image.commands_start();
    for index in 0..image.header.ncmds {
        let mut raw = [0u8; LoadCommandHeader::SIZE as usize];
        if offset + raw.len() as u64 > end {
            return Err(Error::MalformedCommand {
                index,
                offset,
                cmdsize: 0,
            });
        }
        image.read(io, offset, &mut raw)?;

        let lc = LoadCommandHeader::parse(image.endian(), &raw);
        let command = LoadCommand {
            index,
            offset,
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
        };

        if lc.cmdsize < LoadCommandHeader::SIZE || offset + lc.cmdsize as u64 > end {
            return Err(Error::MalformedCommand {
                index,
                offset,
                cmdsize: lc.cmdsize,
            });
        }

        debug!(
            "load command #{}: cmd={:#x} size={:#x} at {:#x}",
            index, lc.cmd, lc.cmdsize, offset
        );

        let mut handle = CommandHandle {
            io: &mut *io,
            image,
            command,
        };
        if visit(&mut handle)?.is_break() {
            break;
        }

        offset += lc.cmdsize as u64;
    }

    Ok(())
}

/// Collects the position and prefix of every command.
pub fn load_commands<S>(io: &mut S, image: &Image) -> Result<Vec<LoadCommand>>
where
    S: Read + Write + Seek,
{
    let mut commands = Vec::with_capacity(image.header.ncmds as usize);
    for_each_command(io, image, |handle| {
        commands.push(handle.command);
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(commands)
}

/// Extracts the NUL-terminated path of a dylib command body.
///
/// Returns `None` when the name offset points outside the command.
pub fn dylib_name(endian: Endian, body: &[u8]) -> Option<&[u8]> {
    if body.len() < DylibCommand::SIZE as usize {
        return None;
    }
    let start = DylibCommand::parse(endian, body).name as usize;
    let tail = body.get(start..)?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Some(&tail[..end])
}

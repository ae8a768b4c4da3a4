//! Preparing the file that gets patched: either the input itself, or a
//! fresh copy of it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::confirm::{Confirm, Decision};

/// Default output path for `input` when none is given.
pub fn patched_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push("_patched");
    PathBuf::from(name)
}

/// An open, writable binary ready for patching.
#[derive(Debug)]
pub struct Staged {
    pub path: PathBuf,
    pub file: File,
    /// True when `path` is a copy made by [`stage`].
    pub copied: bool,
}

impl Staged {
    /// Closes the file and removes it if it was a copy.
    pub fn discard(self) -> io::Result<()> {
        let Staged { path, file, copied } = self;
        drop(file);
        if copied {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOptions {
    /// Patch the input file directly.
    pub inplace: bool,
    /// Replace an existing output file without asking.
    pub overwrite: bool,
}

fn open_in_place(input: &Path) -> io::Result<Staged> {
    let file = OpenOptions::new().read(true).write(true).open(input)?;
    Ok(Staged {
        path: input.to_path_buf(),
        file,
        copied: false,
    })
}

/// True when both paths exist and resolve to the same file.
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    if !b.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

/// Opens the binary to patch.
///
/// Returns `Ok(None)` when the output already exists and replacing it was
/// declined.
pub fn stage<C>(
    input: &Path,
    output: Option<&Path>,
    options: StageOptions,
    confirm: &mut C,
) -> io::Result<Option<Staged>>
where
    C: Confirm + ?Sized,
{
    if options.inplace {
        return open_in_place(input).map(Some);
    }

    let path = output.map_or_else(|| patched_path(input), Path::to_path_buf);
    if !options.overwrite
        && path.exists()
        && !confirm.confirm(&Decision::OverwriteOutput { path: path.clone() })
    {
        return Ok(None);
    }

    // Replacing the input with a copy of itself would delete it first.
    if same_file(input, &path)? {
        debug!("{} is the input file, patching in place", path.display());
        return open_in_place(input).map(Some);
    }

    if path.exists() {
        fs::remove_file(&path)?;
    }
    fs::copy(input, &path)?;

    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    Ok(Some(Staged {
        path,
        file,
        copied: true,
    }))
}

//! Decision points that need a yes/no answer before patching continues.

use std::fmt;
use std::path::PathBuf;

/// A question raised while preparing or patching a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The dylib to insert does not exist on this machine.
    MissingDependency { path: String },
    /// The output file already exists.
    OverwriteOutput { path: PathBuf },
    /// The image already loads the dylib.
    ConflictingDependency { path: String },
    /// The image ends with an `LC_CODE_SIGNATURE` that can be stripped.
    StripSignature,
    /// The bytes after the command table are not all zero.
    OccupiedSlack { offset: u64, len: u32 },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::MissingDependency { path } => {
                write!(f, "Dylib `{path}` does not exist, continue anyway?")
            }
            Decision::OverwriteOutput { path } => {
                write!(f, "Output file `{}` already exists, overwrite?", path.display())
            }
            Decision::ConflictingDependency { path } => write!(
                f,
                "Binary already contains a load command for `{path}`, continue anyway?"
            ),
            Decision::StripSignature => {
                write!(f, "LC_CODE_SIGNATURE load command found, remove it?")
            }
            Decision::OccupiedSlack { offset, len } => write!(
                f,
                "It doesn't seem like there are {len} empty bytes at {offset:#x}, continue anyway?"
            ),
        }
    }
}

/// Answers [`Decision`]s.
pub trait Confirm {
    fn confirm(&mut self, decision: &Decision) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&Decision) -> bool,
{
    fn confirm(&mut self, decision: &Decision) -> bool {
        self(decision)
    }
}

/// Gives the same answer to every question without prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAnswer(pub bool);

impl AutoAnswer {
    pub const ACCEPT: Self = Self(true);
    pub const DENY: Self = Self(false);
}

impl Default for AutoAnswer {
    fn default() -> Self {
        Self::DENY
    }
}

impl Confirm for AutoAnswer {
    fn confirm(&mut self, _decision: &Decision) -> bool {
        self.0
    }
}

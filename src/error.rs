//! Error types for load command insertion.

use thiserror::Error;

/// The main error type for patching an image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown magic: {magic:#x}")]
    UnknownFormat { magic: u32 },

    #[error("load command #{index} at offset {offset:#x} has invalid size {cmdsize:#x}")]
    MalformedCommand { index: u32, offset: u64, cmdsize: u32 },

    #[error("malformed fat header: {reason}")]
    MalformedArchive { reason: String },

    #[error("range {offset:#x}+{len:#x} lies outside the image (size: {limit:#x})")]
    OutOfBounds { offset: u64, len: u64, limit: u64 },

    #[error("not enough empty space for a {needed} byte load command at offset {offset:#x}")]
    InsufficientSlackSpace { offset: u64, needed: u32 },

    #[error("dylib path of {len} bytes does not fit in a load command")]
    CommandTooLarge { len: usize },
}

/// A specialized Result type for insertion operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the failure only concerns the current slice and was
    /// the result of a declinable decision rather than a broken file.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InsufficientSlackSpace { .. })
    }

    #[inline]
    pub(crate) fn malformed_archive(reason: impl Into<String>) -> Self {
        Error::MalformedArchive {
            reason: reason.into(),
        }
    }
}

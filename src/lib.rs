//! insert_dylib - add a dylib load command to a Mach-O binary in place.
//!
//! The new `LC_LOAD_DYLIB` (or `LC_LOAD_WEAK_DYLIB`) is written into the
//! zero-filled space after the load command table; no existing byte of the
//! image is moved. Thin 32/64-bit images of either byte order and fat
//! binaries (with 32 or 64-bit arch tables) are supported, and a trailing
//! code signature can be stripped on the way.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::OpenOptions;
//! use insert_dylib::{insert_into_file, AutoAnswer, InsertOptions, Summary};
//!
//! fn main() -> insert_dylib::Result<()> {
//!     let mut file = OpenOptions::new().read(true).write(true).open("MyApp")?;
//!     let report = insert_into_file(
//!         &mut file,
//!         "@executable_path/libhook.dylib",
//!         &InsertOptions::default(),
//!         &mut AutoAnswer::default(),
//!     )?;
//!     assert_eq!(report.summary(), Summary::AllSucceeded);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod confirm;
pub mod error;
pub mod fat;
pub mod ffi;
pub mod header;
pub mod insert;
pub mod stage;
pub mod walker;

pub use confirm::{AutoAnswer, Confirm, Decision};
pub use error::{Error, Result};
pub use fat::{insert_into_file, split, Report, SliceReport, Summary};
pub use header::{Image, MachHeader, MachKind};
pub use insert::{
    insert_dylib, InsertOptions, Insertion, Outcome, OverwritePolicy, SignatureAction,
    StripSignature,
};
pub use walker::{for_each_command, load_commands, CommandHandle, LoadCommand};

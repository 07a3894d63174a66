//! Common code for the `fsck` utility.
//!
//! The library exposes the partition resolver, the on-disk structures of the
//! second extended filesystem and the consistency check engine, so that they
//! can be driven against any seekable device, a real disk image as well as an
//! in-memory buffer.

pub mod disk;
pub mod ext2;
pub mod fsck;
pub mod partition;
pub mod util;

use std::fmt;
use std::process::exit;

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

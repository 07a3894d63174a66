//! Positioned I/O primitives over a raw disk image.
//!
//! Every on-disk structure the checker touches is read and written through a
//! [`Disk`], by absolute byte position or by sector. The device is any
//! seekable handle: a plain file for the command line tool, an in-memory
//! buffer in tests.

use libc::ioctl;
use std::ffi::c_long;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The size of a disk sector in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// A disk image, accessed by absolute byte position.
#[derive(Debug)]
pub struct Disk<D> {
    /// The underlying device.
    dev: D,
}

impl Disk<File> {
    /// Opens the image at the given path, read-write.
    pub fn open(path: &Path) -> io::Result<Self> {
        let dev = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(dev))
    }
}

impl<D: Read + Write + Seek> Disk<D> {
    /// Creates a disk over the given device handle.
    pub fn new(dev: D) -> Self {
        Self {
            dev,
        }
    }

    /// Consumes the disk and returns the underlying device handle.
    pub fn into_inner(self) -> D {
        self.dev
    }

    /// Reads exactly `buf.len()` bytes at the byte offset `off`.
    pub fn read_bytes(&mut self, off: u64, buf: &mut [u8]) -> io::Result<()> {
        self.dev.seek(SeekFrom::Start(off))?;
        self.dev.read_exact(buf)
    }

    /// Writes the whole of `buf` at the byte offset `off`.
    pub fn write_bytes(&mut self, off: u64, buf: &[u8]) -> io::Result<()> {
        self.dev.seek(SeekFrom::Start(off))?;
        self.dev.write_all(buf)
    }

    /// Reads exactly `buf.len()` bytes starting at the given sector.
    pub fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        self.read_bytes(sector * SECTOR_SIZE, buf)
    }
}

/// Returns the number of sectors on the device or image at the given path.
pub fn get_disk_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    let file_type = metadata.file_type();

    if file_type.is_block_device() || file_type.is_char_device() {
        let dev = File::open(path)?;

        let mut size: u64 = 0;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }

        Ok(size / SECTOR_SIZE)
    } else if file_type.is_file() {
        Ok(metadata.len() / SECTOR_SIZE)
    } else {
        Ok(0)
    }
}

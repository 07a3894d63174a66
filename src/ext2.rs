//! On-disk structures of the second extended filesystem.
//!
//! The filesystem divides the partition into block groups, each carrying a
//! block bitmap, an inode bitmap and a slice of the inode table. The
//! superblock at offset 1024 describes the geometry; the group descriptor
//! table right after it locates the per-group structures.
//!
//! All multi-byte fields are little-endian. Fixed-layout records are read and
//! written through byte reinterpretation of packed structures; directory
//! entries are variable length and get their own codec in the checker.

use crate::disk::Disk;
use crate::partition::Partition;
use crate::util::reinterpret_mut;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use std::mem;
use std::mem::size_of;
use std::slice;

/// The offset of the superblock from the beginning of the partition.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The offset of the group descriptor table from the beginning of the partition.
pub const BGDT_OFFSET: u64 = 2048;
/// The filesystem's signature.
pub const EXT2_SIGNATURE: u16 = 0xef53;

/// The inode of the root directory.
pub const ROOT_INODE: u32 = 2;
/// The number of direct block pointers on an inode.
pub const DIRECT_BLOCKS_COUNT: usize = 12;
/// A symlink whose target is shorter than this is stored inline in the block
/// pointers and owns no data block.
pub const SYMLINK_INLINE_LIMIT: u32 = 60;

/// File type mask of the mode field.
const S_IFMT: u16 = 0xf000;
/// File type: FIFO.
const S_IFIFO: u16 = 0x1000;
/// File type: char device.
const S_IFCHR: u16 = 0x2000;
/// File type: directory.
const S_IFDIR: u16 = 0x4000;
/// File type: block device.
const S_IFBLK: u16 = 0x6000;
/// File type: regular file.
const S_IFREG: u16 = 0x8000;
/// File type: symbolic link.
const S_IFLNK: u16 = 0xa000;
/// File type: socket.
const S_IFSOCK: u16 = 0xc000;

/// Directory entry type indicator: Unknown.
pub const TYPE_INDICATOR_UNKNOWN: u8 = 0;
/// Directory entry type indicator: Regular file.
pub const TYPE_INDICATOR_REGULAR: u8 = 1;
/// Directory entry type indicator: Directory.
pub const TYPE_INDICATOR_DIRECTORY: u8 = 2;
/// Directory entry type indicator: Char device.
pub const TYPE_INDICATOR_CHAR_DEVICE: u8 = 3;
/// Directory entry type indicator: Block device.
pub const TYPE_INDICATOR_BLOCK_DEVICE: u8 = 4;
/// Directory entry type indicator: FIFO.
pub const TYPE_INDICATOR_FIFO: u8 = 5;
/// Directory entry type indicator: Socket.
pub const TYPE_INDICATOR_SOCKET: u8 = 6;
/// Directory entry type indicator: Symbolic link.
pub const TYPE_INDICATOR_SYMLINK: u8 = 7;

/// Enumeration of file types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A character device.
    CharDevice,
    /// A block device.
    BlockDevice,
    /// A named pipe.
    Fifo,
    /// A Unix socket.
    Socket,
    /// A symbolic link.
    Link,
}

impl FileType {
    /// Returns the type described by the type bits of `mode`.
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFIFO => Some(Self::Fifo),
            S_IFCHR => Some(Self::CharDevice),
            S_IFDIR => Some(Self::Directory),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFREG => Some(Self::Regular),
            S_IFLNK => Some(Self::Link),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// Returns the type indicator stored in directory entries.
    pub fn to_dirent_type(self) -> u8 {
        match self {
            Self::Regular => TYPE_INDICATOR_REGULAR,
            Self::Directory => TYPE_INDICATOR_DIRECTORY,
            Self::CharDevice => TYPE_INDICATOR_CHAR_DEVICE,
            Self::BlockDevice => TYPE_INDICATOR_BLOCK_DEVICE,
            Self::Fifo => TYPE_INDICATOR_FIFO,
            Self::Socket => TYPE_INDICATOR_SOCKET,
            Self::Link => TYPE_INDICATOR_SYMLINK,
        }
    }
}

/// The ext2 superblock, stored 1024 bytes from the beginning of the partition.
#[repr(C, packed)]
pub struct Superblock {
    /// Total number of inodes in the filesystem.
    s_inodes_count: u32,
    /// Total number of blocks in the filesystem.
    s_blocks_count: u32,
    /// Number of blocks reserved for the superuser.
    s_r_blocks_count: u32,
    /// Total number of unallocated blocks.
    s_free_blocks_count: u32,
    /// Total number of unallocated inodes.
    s_free_inodes_count: u32,
    /// The first block tracked by the block bitmaps.
    s_first_data_block: u32,
    /// log2(block_size) - 10.
    s_log_block_size: u32,
    /// log2(fragment_size) - 10.
    s_log_frag_size: u32,
    /// The number of blocks per block group.
    s_blocks_per_group: u32,
    /// The number of fragments per block group.
    s_frags_per_group: u32,
    /// The number of inodes per block group.
    s_inodes_per_group: u32,
    /// The timestamp of the last mount operation.
    s_mtime: u32,
    /// The timestamp of the last write operation.
    s_wtime: u32,
    /// The number of mounts since the last consistency check.
    s_mnt_count: u16,
    /// The number of mounts allowed before a consistency check must be done.
    s_max_mnt_count: u16,
    /// The ext2 signature.
    s_magic: u16,
    /// The filesystem's state.
    s_state: u16,
    /// The action to perform when an error is detected.
    s_errors: u16,
    /// The minor revision level.
    s_minor_rev_level: u16,
    /// The timestamp of the last consistency check.
    s_lastcheck: u32,
    /// The interval between mandatory consistency checks.
    s_checkinterval: u32,
    /// The id of the operating system that created the filesystem.
    s_creator_os: u32,
    /// The major revision level.
    s_rev_level: u32,
    /// The UID of the user that can use reserved blocks.
    s_def_resuid: u16,
    /// The GID of the group that can use reserved blocks.
    s_def_resgid: u16,

    // Extended superblock fields

    /// The first non-reserved inode.
    s_first_ino: u32,
    /// The size of an inode record in bytes.
    s_inode_size: u16,
    /// The block group containing this superblock.
    s_block_group_nr: u16,
    /// Optional features in use.
    s_feature_compat: u32,
    /// Required features in use.
    s_feature_incompat: u32,
    /// Features required for writing.
    s_feature_ro_compat: u32,
    /// The filesystem id.
    s_uuid: [u8; 16],
    /// The volume name.
    s_volume_name: [u8; 16],
    /// The path the volume was last mounted to.
    s_last_mounted: [u8; 64],
    /// Compression algorithms in use.
    s_algo_bitmap: u32,

    /// Structure padding.
    _padding: [u8; 820],
}

impl Superblock {
    /// Reads the superblock of the partition starting at byte offset `base`.
    pub fn read<D: Read + Write + Seek>(disk: &mut Disk<D>, base: u64) -> io::Result<Self> {
        let mut sb: Superblock = unsafe { mem::zeroed() };
        disk.read_bytes(base + SUPERBLOCK_OFFSET, reinterpret_mut(&mut sb))?;
        Ok(sb)
    }

    /// Tells whether the superblock carries the ext2 signature and a
    /// geometry this tool can work with (1 KiB to 4 KiB blocks).
    pub fn is_valid(&self) -> bool {
        // One bitmap block tracks a whole group, bounding blocks_per_group
        self.s_magic == EXT2_SIGNATURE
            && self.s_log_block_size <= 2
            && self.s_blocks_count > 0
            && self.s_blocks_per_group > 0
            && self.s_blocks_per_group <= self.block_size() * 8
            && self.s_inodes_per_group > 0
            && self.inode_size() > 0
    }

    /// Returns the size of a block in bytes.
    pub fn block_size(&self) -> u32 {
        1024 << self.s_log_block_size
    }

    /// Returns the size of an inode record in bytes.
    pub fn inode_size(&self) -> u32 {
        if self.s_rev_level >= 1 {
            self.s_inode_size as u32
        } else {
            128
        }
    }

    /// Returns the distilled geometry the repair passes work with.
    pub fn geometry(&self) -> FsGeometry {
        let blocks_count = self.s_blocks_count;
        let blocks_per_group = self.s_blocks_per_group;
        FsGeometry {
            block_size: self.block_size(),
            inode_size: self.inode_size(),
            blocks_count,
            blocks_per_group,
            inodes_count: self.s_inodes_count,
            inodes_per_group: self.s_inodes_per_group,
            groups_count: (blocks_count - 1) / blocks_per_group + 1,
        }
    }
}

/// Filesystem geometry, derived from the superblock once per repair.
#[derive(Clone, Copy, Debug)]
pub struct FsGeometry {
    /// The size of a block in bytes.
    pub block_size: u32,
    /// The size of an inode record in bytes.
    pub inode_size: u32,
    /// The total number of blocks.
    pub blocks_count: u32,
    /// The number of blocks per group.
    pub blocks_per_group: u32,
    /// The total number of inodes.
    pub inodes_count: u32,
    /// The number of inodes per group.
    pub inodes_per_group: u32,
    /// The number of block groups.
    pub groups_count: u32,
}

impl FsGeometry {
    /// Returns the number of the first block tracked by the block bitmaps.
    ///
    /// With 1 KiB blocks the boot record occupies block 0 on its own and
    /// accounting starts at block 1; with larger blocks it starts at block 0.
    pub fn first_data_block(&self) -> u32 {
        (SUPERBLOCK_OFFSET / self.block_size as u64) as u32
    }
}

/// A block group descriptor of the group descriptor table.
#[repr(C, packed)]
#[derive(Clone, Copy, Default, Debug)]
pub struct BlockGroupDescriptor {
    /// The block containing the group's block bitmap.
    pub bg_block_bitmap: u32,
    /// The block containing the group's inode bitmap.
    pub bg_inode_bitmap: u32,
    /// The first block of the group's inode table.
    pub bg_inode_table: u32,
    /// Number of unallocated blocks in the group.
    bg_free_blocks_count: u16,
    /// Number of unallocated inodes in the group.
    bg_free_inodes_count: u16,
    /// Number of directories in the group.
    bg_used_dirs_count: u16,

    /// Structure padding.
    _padding: [u8; 14],
}

/// Reads the group descriptor table of the partition.
pub fn read_bgdt<D: Read + Write + Seek>(
    disk: &mut Disk<D>,
    partition: &Partition,
    geom: &FsGeometry,
) -> io::Result<Vec<BlockGroupDescriptor>> {
    let mut table = vec![BlockGroupDescriptor::default(); geom.groups_count as usize];
    let buf = unsafe {
        slice::from_raw_parts_mut(
            table.as_mut_ptr() as *mut u8,
            table.len() * size_of::<BlockGroupDescriptor>(),
        )
    };
    disk.read_bytes(partition.base + BGDT_OFFSET, buf)?;
    Ok(table)
}

/// An inode record of the inode table.
///
/// The name of a file is not stored in the inode but in the directory entries
/// pointing to it; the stored link count is the number of such entries.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Inode {
    /// Type and permissions.
    pub i_mode: u16,
    /// User ID.
    i_uid: u16,
    /// Lower 32 bits of the size in bytes.
    pub i_size: u32,
    /// Timestamp of the last access.
    i_atime: u32,
    /// Timestamp of the last metadata modification.
    i_ctime: u32,
    /// Timestamp of the last content modification.
    i_mtime: u32,
    /// Timestamp of the deletion.
    i_dtime: u32,
    /// Group ID.
    i_gid: u16,
    /// The number of hard links to the inode.
    pub i_links_count: u16,
    /// The number of sectors used by the inode.
    i_blocks: u32,
    /// Inode flags.
    i_flags: u32,
    /// OS-specific value.
    i_osd1: u32,
    /// Direct block pointers. Zero means absent.
    pub i_block: [u32; DIRECT_BLOCKS_COUNT],
    /// Singly indirect block pointer.
    pub i_singly_block: u32,
    /// Doubly indirect block pointer.
    pub i_doubly_block: u32,
    /// Triply indirect block pointer.
    pub i_triply_block: u32,
    /// Generation number.
    i_generation: u32,
    /// Extended attributes block.
    i_file_acl: u32,
    /// Higher 32 bits of the size in bytes.
    i_dir_acl: u32,
    /// Block address of the fragment.
    i_faddr: u32,
    /// OS-specific value.
    i_osd2: [u8; 12],
}

impl Inode {
    /// Tells whether the inode is a directory.
    pub fn is_directory(&self) -> bool {
        self.i_mode & S_IFMT == S_IFDIR
    }

    /// Tells whether the inode is a symlink whose target is stored inline in
    /// the block pointers.
    pub fn is_fast_symlink(&self) -> bool {
        self.i_mode & S_IFMT == S_IFLNK && self.i_size < SYMLINK_INLINE_LIMIT
    }
}

/// Returns the byte offset in the image of the inode record `ino`.
///
/// Inode numbering starts at 1.
pub fn inode_offset(
    partition: &Partition,
    geom: &FsGeometry,
    bgdt: &[BlockGroupDescriptor],
    ino: u32,
) -> u64 {
    let group = (ino - 1) / geom.inodes_per_group;
    let index = (ino - 1) % geom.inodes_per_group;

    let table_off = bgdt[group as usize].bg_inode_table as u64 * geom.block_size as u64;
    partition.base + table_off + index as u64 * geom.inode_size as u64
}

/// Tells whether bit `index` of the bitmap stored in `buf` is set.
pub fn bitmap_test(buf: &[u8], index: usize) -> bool {
    buf[index / 8] & (1 << (index % 8)) != 0
}

/// Sets or clears bit `index` of the bitmap stored in `buf`.
pub fn bitmap_set(buf: &mut [u8], index: usize, value: bool) {
    if value {
        buf[index / 8] |= 1 << (index % 8);
    } else {
        buf[index / 8] &= !(1 << (index % 8));
    }
}

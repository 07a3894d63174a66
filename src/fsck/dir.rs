//! Directory entry records, name lookup and lost+found insertion.
//!
//! Directory entries are packed variable-length records, parsed on the raw
//! block bytes with explicit little-endian loads at fixed offsets.

use super::walk;
use super::FsckContext;
use crate::ext2::FileType;
use crate::ext2::Inode;
use crate::ext2::ROOT_INODE;
use crate::ext2::TYPE_INDICATOR_UNKNOWN;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::Write;

/// The offset of the name inside a directory entry record.
pub const NAME_OFFSET: usize = 8;
/// The alignment of directory entry records.
pub const ALIGN: usize = 4;

/// A directory entry decoded from a directory data block.
///
/// Entries chain through `rec_len` up to the end of their block; the final
/// entry of a block absorbs the trailing slack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    /// The inode the entry points to. Zero marks an unused entry.
    pub inode: u32,
    /// The total length of the record in bytes.
    pub rec_len: u16,
    /// The entry's type indicator.
    pub file_type: u8,
    /// The entry's name, unterminated bytes.
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Decodes the record at offset `off` of the block `buf`.
    ///
    /// Returns `None` when the record does not fit in the block.
    pub fn decode(buf: &[u8], off: usize) -> Option<Self> {
        if off + NAME_OFFSET > buf.len() {
            return None;
        }
        let inode = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let rec_len = u16::from_le_bytes([buf[off + 4], buf[off + 5]]);
        let name_len = buf[off + 6] as usize;
        let file_type = buf[off + 7];

        if (rec_len as usize) < NAME_OFFSET
            || off + rec_len as usize > buf.len()
            || off + NAME_OFFSET + name_len > buf.len()
        {
            return None;
        }
        let name = buf[off + NAME_OFFSET..off + NAME_OFFSET + name_len].to_vec();

        Some(Self {
            inode,
            rec_len,
            file_type,
            name,
        })
    }

    /// Encodes the record at offset `off` of the block `buf`.
    pub fn encode(&self, buf: &mut [u8], off: usize) {
        buf[off..off + 4].copy_from_slice(&self.inode.to_le_bytes());
        buf[off + 4..off + 6].copy_from_slice(&self.rec_len.to_le_bytes());
        buf[off + 6] = self.name.len() as u8;
        buf[off + 7] = self.file_type;
        buf[off + NAME_OFFSET..off + NAME_OFFSET + self.name.len()].copy_from_slice(&self.name);
    }

    /// Returns the smallest aligned record length able to hold a name of
    /// `name_len` bytes.
    pub fn min_rec_len(name_len: usize) -> usize {
        NAME_OFFSET + (name_len + ALIGN - 1) / ALIGN * ALIGN
    }
}

/// Returns the offset and record of the final entry of the block, the one
/// whose record reaches the end of the block.
fn chain_end(buf: &[u8]) -> Option<(usize, DirEntry)> {
    let mut off = 0;
    loop {
        let ent = DirEntry::decode(buf, off)?;
        if off + ent.rec_len as usize >= buf.len() {
            return Some((off, ent));
        }
        off += ent.rec_len as usize;
    }
}

/// Returns the inode number stored in the `..` entry of the directory
/// `inode`, or zero when the directory has no readable first block.
pub(crate) fn stored_parent<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    inode: &Inode,
) -> io::Result<u32> {
    let direct = inode.i_block;
    if direct[0] == 0 {
        return Ok(0);
    }
    let buf = ctx.read_block(direct[0])?;
    let Some(dot) = DirEntry::decode(&buf, 0) else {
        return Ok(0);
    };
    let Some(dotdot) = DirEntry::decode(&buf, dot.rec_len as usize) else {
        return Ok(0);
    };
    Ok(dotdot.inode)
}

/// Looks `name` up in the directory `dir` and returns the matching inode.
pub(crate) fn find_entry<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    dir: u32,
    name: &[u8],
) -> io::Result<Option<u32>> {
    let inode = ctx.read_inode(dir)?;
    if !inode.is_directory() {
        return Ok(None);
    }
    for blk in walk::data_blocks(ctx, &inode)? {
        let buf = ctx.read_block(blk)?;
        let mut off = 0;
        while off < buf.len() {
            let Some(ent) = DirEntry::decode(&buf, off) else {
                break;
            };
            if (1..=ctx.geom.inodes_count).contains(&ent.inode) && ent.name == name {
                return Ok(Some(ent.inode));
            }
            off += ent.rec_len as usize;
        }
    }
    Ok(None)
}

/// Resolves an absolute `/`-separated path to an inode number.
pub fn resolve_path<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    path: &str,
) -> io::Result<Option<u32>> {
    let mut ino = ROOT_INODE;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        match find_entry(ctx, ino, component.as_bytes())? {
            Some(next) => ino = next,
            None => return Ok(None),
        }
    }
    Ok(Some(ino))
}

/// Appends an entry for `ino` at the end of the entry chain of the directory
/// `dir`. The entry is named after the decimal inode number.
///
/// The final entry of the chain is shrunk to its aligned footprint and the
/// new entry placed right after it, absorbing the slack up to the block
/// boundary. Returns `false` when no block of the directory has room.
pub(crate) fn link_into<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    dir: u32,
    ino: u32,
    inode: &Inode,
) -> io::Result<bool> {
    let name = ino.to_string().into_bytes();
    let file_type = FileType::from_mode(inode.i_mode)
        .map(FileType::to_dirent_type)
        .unwrap_or(TYPE_INDICATOR_UNKNOWN);

    let dir_inode = ctx.read_inode(dir)?;
    let block_size = ctx.geom.block_size as usize;
    for blk in walk::data_blocks(ctx, &dir_inode)? {
        let mut buf = ctx.read_block(blk)?;
        let Some((last_off, mut last)) = chain_end(&buf) else {
            continue;
        };

        let footprint = DirEntry::min_rec_len(last.name.len());
        let new_off = last_off + footprint;
        if new_off + DirEntry::min_rec_len(name.len()) > block_size {
            continue;
        }

        last.rec_len = footprint as u16;
        last.encode(&mut buf, last_off);

        let entry = DirEntry {
            inode: ino,
            rec_len: (block_size - new_off) as u16,
            file_type,
            name: name.clone(),
        };
        entry.encode(&mut buf, new_off);

        ctx.write_block(blk, &buf)?;
        return Ok(true);
    }
    Ok(false)
}

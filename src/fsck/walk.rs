//! Traversal of inode block trees and of the directory tree.
//!
//! An inode addresses its content through 12 direct block pointers followed
//! by a singly, a doubly and a triply indirect pointer. Zero entries
//! terminate a run inside an indirect block. Each recursion level reads into
//! its own buffer.

use super::dir::DirEntry;
use super::FsckContext;
use crate::ext2::Inode;
use crate::ext2::ROOT_INODE;
use crate::ext2::TYPE_INDICATOR_DIRECTORY;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::Write;

/// Returns every block reachable through the inode's block pointers, the
/// indirect pointer blocks themselves included.
///
/// A fast symlink owns no block: its pointer words hold the link target.
pub(crate) fn reachable_blocks<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    inode: &Inode,
) -> io::Result<Vec<u32>> {
    collect_blocks(ctx, inode, true)
}

/// Returns the inode's data blocks in file order, indirect pointer blocks
/// excluded.
pub(crate) fn data_blocks<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    inode: &Inode,
) -> io::Result<Vec<u32>> {
    collect_blocks(ctx, inode, false)
}

fn collect_blocks<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    inode: &Inode,
    include_pointers: bool,
) -> io::Result<Vec<u32>> {
    let mut blocks = Vec::new();
    if inode.is_fast_symlink() {
        return Ok(blocks);
    }

    let direct = inode.i_block;
    for &blk in &direct {
        if blk != 0 {
            blocks.push(blk);
        }
    }

    let roots = [
        (inode.i_singly_block, 1),
        (inode.i_doubly_block, 2),
        (inode.i_triply_block, 3),
    ];
    for (root, depth) in roots {
        if root == 0 {
            continue;
        }
        if include_pointers {
            blocks.push(root);
        }
        collect_indirect(ctx, root, depth, include_pointers, &mut blocks)?;
    }
    Ok(blocks)
}

/// Collects the blocks reachable through the indirect block `blk`, `depth`
/// levels away from the data.
fn collect_indirect<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    blk: u32,
    depth: u32,
    include_pointers: bool,
    blocks: &mut Vec<u32>,
) -> io::Result<()> {
    let buf = ctx.read_block(blk)?;
    for chunk in buf.chunks_exact(4) {
        let entry = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if entry == 0 {
            break;
        }
        if depth == 1 {
            blocks.push(entry);
        } else {
            if include_pointers {
                blocks.push(entry);
            }
            collect_indirect(ctx, entry, depth - 1, include_pointers, blocks)?;
        }
    }
    Ok(())
}

/// Pass 1: walks the directory tree from the root, patching `.`/`..` entries
/// and tallying directory references into the context's reference map.
pub(crate) fn walk_tree<D: Read + Write + Seek>(ctx: &mut FsckContext<'_, D>) -> io::Result<()> {
    walk_directory(ctx, ROOT_INODE, ROOT_INODE)
}

/// Walks the directory `ino` whose parent directory is `parent`.
///
/// For the root directory, the parent is the root itself.
pub(crate) fn walk_directory<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    ino: u32,
    parent: u32,
) -> io::Result<()> {
    let inode = ctx.read_inode(ino)?;
    if !inode.is_directory() {
        return Ok(());
    }

    let direct = inode.i_block;
    for (i, &blk) in direct.iter().enumerate() {
        if blk == 0 {
            continue;
        }
        walk_directory_block(ctx, blk, i == 0, ino, parent)?;
    }

    let roots = [
        (inode.i_singly_block, 1),
        (inode.i_doubly_block, 2),
        (inode.i_triply_block, 3),
    ];
    for (root, depth) in roots {
        if root != 0 {
            walk_indirect_directory(ctx, root, depth, ino, parent)?;
        }
    }
    Ok(())
}

/// Walks the directory data blocks reachable through the indirect block
/// `blk`, `depth` levels away from the data.
fn walk_indirect_directory<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    blk: u32,
    depth: u32,
    ino: u32,
    parent: u32,
) -> io::Result<()> {
    let buf = ctx.read_block(blk)?;
    for chunk in buf.chunks_exact(4) {
        let entry = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if entry == 0 {
            break;
        }
        if depth == 1 {
            walk_directory_block(ctx, entry, false, ino, parent)?;
        } else {
            walk_indirect_directory(ctx, entry, depth - 1, ino, parent)?;
        }
    }
    Ok(())
}

/// Parses the entries of one directory data block.
///
/// `first` tells whether `blk` is the directory's first direct block, the one
/// holding the `.` and `..` entries in its first two slots. A stored inode
/// disagreeing with `current`/`parent` there is overwritten on disk; the name
/// bytes are never touched.
///
/// An entry of type directory is recursed into only on its first reference,
/// so that each directory is visited exactly once per walk even when parent
/// pointers are corrupt.
fn walk_directory_block<D: Read + Write + Seek>(
    ctx: &mut FsckContext<'_, D>,
    blk: u32,
    first: bool,
    current: u32,
    parent: u32,
) -> io::Result<()> {
    let mut buf = ctx.read_block(blk)?;
    let mut off = 0;
    let mut idx = 0;
    while off < buf.len() {
        let Some(mut ent) = DirEntry::decode(&buf, off) else {
            println!("directory inode {current}: malformed entry chain in block {blk}");
            break;
        };

        if first && idx < 2 {
            let (target, name): (u32, &[u8]) = match idx {
                0 => (current, &b"."[..]),
                _ => (parent, &b".."[..]),
            };
            if ent.name != name || ent.inode != target {
                println!(
                    "bad `{}` entry in directory inode {current} (stored inode {}), repairing",
                    String::from_utf8_lossy(name),
                    ent.inode
                );
                let pos = ctx.block_offset(blk) + off as u64;
                ctx.disk.write_bytes(pos, &target.to_le_bytes())?;
                buf[off..off + 4].copy_from_slice(&target.to_le_bytes());
                ent.inode = target;
            }
        }

        if (1..=ctx.geom.inodes_count).contains(&ent.inode) {
            ctx.inode_refs[ent.inode as usize] += 1;

            let recurse = ent.file_type == TYPE_INDICATOR_DIRECTORY
                && ctx.inode_refs[ent.inode as usize] <= 1
                && !(first && idx < 2);
            if recurse {
                walk_directory(ctx, ent.inode, current)?;
            }
        }

        off += ent.rec_len as usize;
        idx += 1;
    }
    Ok(())
}

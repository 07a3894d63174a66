//! `fsck` checks and repairs second extended filesystems inside a raw disk
//! image.
//!
//! The image may hold several partitions; the tool resolves them through the
//! MBR primary table and the EBR chain of an extended primary.

use fsck_common::disk;
use fsck_common::disk::Disk;
use fsck_common::error;
use fsck_common::fsck;
use fsck_common::partition;
use std::env;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the disk image.
    image: Option<PathBuf>,
    /// The partition whose record is to be printed.
    print_partition: Option<u32>,
    /// The partition to repair. Zero means every Linux partition.
    fix_partition: Option<u32>,
}

/// Returns the numeric value following the given flag.
fn number_arg(iter: &mut impl Iterator<Item = String>, flag: &str) -> u32 {
    let Some(val) = iter.next() else {
        error("fsck", format_args!("missing value after `{flag}`"));
    };
    val.parse()
        .unwrap_or_else(|_| error("fsck", format_args!("invalid value for `{flag}`: {val}")))
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => res.help = true,
            "-i" => res.image = iter.next().map(PathBuf::from),
            "-p" => res.print_partition = Some(number_arg(&mut iter, "-p")),
            "-f" => res.fix_partition = Some(number_arg(&mut iter, "-f")),
            _ => error("fsck", format_args!("invalid argument `{arg}`")),
        }
    }
    res
}

/// Prints command usage.
fn print_usage() {
    eprintln!("fsck: bad usage");
    eprintln!("Try 'fsck --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" fsck -i <image> [-p <partition>] [-f <partition>]");
    println!();
    println!("Checks and repairs ext2 filesystems inside a raw disk image.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -i <image>\tThe disk image to operate on.");
    println!(" -p <n>\tPrints the type, start sector and length of partition n.");
    println!(" -f <n>\tRepairs the filesystem on partition n; 0 repairs every");
    println!("\t\tLinux partition in ascending order.");
}

fn main() {
    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let Some(image) = args.image else {
        print_usage();
        exit(1);
    };
    if args.print_partition.is_none() && args.fix_partition.is_none() {
        print_usage();
        exit(1);
    }

    let size = disk::get_disk_size(&image)
        .unwrap_or_else(|e| error("fsck", format_args!("{}: {e}", image.display())));
    if size == 0 {
        error("fsck", format_args!("{}: empty image", image.display()));
    }
    let mut disk = Disk::open(&image)
        .unwrap_or_else(|e| error("fsck", format_args!("{}: {e}", image.display())));

    if let Some(n) = args.print_partition {
        match partition::read_partition(&mut disk, n) {
            Ok(Some(part)) => println!("{part}"),
            Ok(None) => {
                println!("-1");
                exit(1);
            }
            Err(e) => error("fsck", format_args!("{}: {e}", image.display())),
        }
    }

    if let Some(n) = args.fix_partition {
        let res = if n == 0 {
            fsck::fix_all(&mut disk)
        } else {
            fsck::fix_partition(&mut disk, n)
        };
        if let Err(e) = res {
            error("fsck", e);
        }
    }
}

use std::fmt::{self, Debug};

use crate::error::Error;
use crate::sys::Record;

/// SmartFS signature (`"RAMS"` read as a little-endian word), used to help
/// confirm the presence of SmartFS on a volume
pub const SMARTFS_MAGIC: u64 = 0x534D4152;

/// Inode id of the root directory. Reserved; the inode allocator never
/// hands it out.
pub const ROOT_INODE: u64 = 0;

/// Block holding the inode allocation bitmap. Reserved for a future bitmap
/// allocator; the current allocators do not consult it.
pub const INODE_BITMAP_BLOCK: u64 = 1;
/// Block holding the data-block allocation bitmap. Reserved like the inode
/// bitmap.
pub const BLOCK_BITMAP_BLOCK: u64 = 2;
/// First block of the inode table.
pub const INODE_AREA_START: u64 = 3;
/// Blocks reserved for the inode table.
pub const INODE_AREA_BLOCKS: u64 = 1024;
/// First block of the persisted dedup index.
pub const DEDUP_AREA_START: u64 = INODE_AREA_START + INODE_AREA_BLOCKS;
/// Blocks reserved for the persisted dedup index (1024 records of 48 bytes).
pub const DEDUP_AREA_BLOCKS: u64 = 12;
/// First block of the data area. The first data block is reserved for the
/// root directory.
pub const DATA_AREA_START: u64 = DEDUP_AREA_START + DEDUP_AREA_BLOCKS;

/// The superblock sits in block 0 and describes the layout of everything
/// behind it: where the bitmaps, the inode table, the dedup index and the
/// data area begin, plus the global block accounting.
///
/// All counters are little-endian 64-bit words. Mutations to `free_blocks`
/// are persisted (whole-block rewrite of block 0) before the corresponding
/// allocation becomes observable.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Superblock {
    /// Magic word identifying a SmartFS image (`SMARTFS_MAGIC`)
    pub magic: u64,
    /// Total number of blocks in the image, metadata included
    pub total_blocks: u64,
    /// Unallocated data blocks. Invariant:
    /// `free_blocks + allocated data blocks == total_blocks - data_area_start`
    pub free_blocks: u64,
    /// Inode id of the root directory (always `ROOT_INODE`)
    pub root_inode: u64,
    /// Block offset of the (reserved) data-block bitmap
    pub block_bitmap_start: u64,
    /// Block offset of the inode table
    pub inode_area_start: u64,
    /// Block offset of the data area
    pub data_area_start: u64,
    /// Block offset of the (reserved) inode bitmap
    pub inode_bitmap_start: u64,
    /// Block offset of the persisted dedup index
    pub dedup_area_start: u64,
}

unsafe impl Record for Superblock {}

impl Superblock {
    /// Lay out a fresh image of `total_blocks` blocks.
    ///
    /// The first data block is handed to the root directory, so it is not
    /// counted as free.
    pub fn new(total_blocks: u64) -> Superblock {
        Superblock {
            magic: SMARTFS_MAGIC,
            total_blocks,
            free_blocks: total_blocks.saturating_sub(DATA_AREA_START + 1),
            root_inode: ROOT_INODE,
            block_bitmap_start: BLOCK_BITMAP_BLOCK,
            inode_area_start: INODE_AREA_START,
            data_area_start: DATA_AREA_START,
            inode_bitmap_start: INODE_BITMAP_BLOCK,
            dedup_area_start: DEDUP_AREA_START,
        }
    }

    /// Reject superblocks whose magic word does not match.
    pub fn check_magic(&self) -> Result<(), Error> {
        if self.magic == SMARTFS_MAGIC {
            Ok(())
        } else {
            Err(Error::BadMagic(self.magic))
        }
    }

    /// Data blocks in the image, the root directory block included.
    pub fn data_blocks(&self) -> u64 {
        self.total_blocks.saturating_sub(self.data_area_start)
    }

    /// Data blocks currently consumed, the root directory block included.
    pub fn allocated_data_blocks(&self) -> u64 {
        self.data_blocks().saturating_sub(self.free_blocks)
    }
}

impl Debug for Superblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Superblock")
            .field("magic", &format_args!("{:#x}", self.magic))
            .field("total_blocks", &self.total_blocks)
            .field("free_blocks", &self.free_blocks)
            .field("root_inode", &self.root_inode)
            .field("inode_area_start", &self.inode_area_start)
            .field("dedup_area_start", &self.dedup_area_start)
            .field("data_area_start", &self.data_area_start)
            .finish()
    }
}

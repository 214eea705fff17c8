//! The owning engine.
//!
//! One [`SmartFs`] binds one backing volume for the lifetime of the
//! process and owns every process-wide structure the on-image format
//! implies: the cached superblock, the allocator cursor, the dedup index,
//! the tiered cache, the WAL and the statistics counters. All operations
//! are methods; nothing here is internally locked, so a multi-threaded host
//! wraps the engine in [`sync::Synced`] and serialises calls.

pub mod dir;
pub mod pipeline;
pub mod store;
pub mod sync;

use std::mem;
use std::path::{Path, PathBuf};

use crate::cache::{CacheConfig, TieredCache};
use crate::dedup::{DedupIndex, DEDUP_CAPACITY, DEDUP_RECORD_SIZE};
use crate::error::Error;
use crate::stats::StorageStats;
use crate::sys::dirent::DirBlock;
use crate::sys::inode::{Inode, TypePerm};
use crate::sys::superblock::{Superblock, DATA_AREA_START, INODE_AREA_BLOCKS};
use crate::sys::{record_as_bytes, record_from_bytes, BLOCK_SIZE};
use crate::version;
use crate::volume::Volume;
use crate::wal::{Wal, WalRecord};

/// Inode slots the inode area can hold. Slot 0 is the root directory.
pub const MAX_INODES: u64 =
    (INODE_AREA_BLOCKS as usize * BLOCK_SIZE / mem::size_of::<Inode>()) as u64;

/// Tunables bound at attach time.
#[derive(Debug, Clone)]
pub struct Options {
    /// Sizing and placement of the two cache tiers.
    pub cache: CacheConfig,
    /// Location of the write-ahead log.
    pub wal_path: PathBuf,
    /// Minimum seconds between automatic snapshots cut by the write path.
    pub snapshot_interval: i64,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            cache: CacheConfig::default(),
            wal_path: PathBuf::from("/tmp/smartfs.wal"),
            snapshot_interval: 60,
        }
    }
}

/// A `statfs`-shaped view of the block accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub block_size: usize,
}

/// A `getattr`-shaped view of one inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub inode_id: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub link_count: u32,
    /// Size of the latest version's content.
    pub size: u64,
    /// Timestamp of the latest version.
    pub mtime: i64,
    pub total_versions: u32,
}

/// Safe wrapper for the raw on-image structures.
pub struct SmartFs<V: Volume> {
    pub(crate) volume: V,
    pub(crate) superblock: Superblock,
    /// Monotonic "next free" cursor of the block allocator; rederived from
    /// the free-count accounting at attach.
    pub(crate) next_block: u64,
    pub(crate) dedup: DedupIndex,
    pub(crate) cache: TieredCache,
    pub(crate) wal: Wal,
    pub(crate) stats: StorageStats,
    pub(crate) options: Options,
    recovered: Vec<WalRecord>,
}

impl<V: Volume> SmartFs<V> {
    /// Lay a fresh SmartFS image down on `volume`: superblock, zeroed
    /// bitmap/inode/dedup areas, the root inode and the root directory
    /// block with `"."` and `".."` pointing at itself.
    pub fn format(volume: &mut V) -> Result<(), Error> {
        let total_blocks = volume.block_count();
        if total_blocks <= DATA_AREA_START + 1 {
            return Err(Error::NoSpace);
        }
        let superblock = Superblock::new(total_blocks);

        let zero = [0_u8; BLOCK_SIZE];
        for block in 1..DATA_AREA_START {
            volume.write_block(block, &zero)?;
        }

        let mut block0 = [0_u8; BLOCK_SIZE];
        let sb_bytes = record_as_bytes(&superblock);
        block0[..sb_bytes.len()].copy_from_slice(sb_bytes);
        volume.write_block(0, &block0)?;

        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let mut root = Inode::new(
            superblock.root_inode,
            TypePerm::DIRECTORY.bits() | 0o755,
            uid,
            gid,
        );
        root.link_count = 2;
        version::init_inode(&mut root);
        {
            let v1 = root.latest_mut().expect("init_inode cut v1");
            v1.file_size = BLOCK_SIZE as u64;
            v1.block_count = 1;
            v1.block_list_start = superblock.data_area_start;
        }
        let root_offset = superblock.inode_area_start * BLOCK_SIZE as u64;
        volume.write_at(root_offset, record_as_bytes(&root))?;

        let root_dir = DirBlock::with_dot_entries(superblock.root_inode, superblock.root_inode);
        let mut dir_block = [0_u8; BLOCK_SIZE];
        dir_block.copy_from_slice(record_as_bytes(&root_dir));
        volume.write_block(superblock.data_area_start, &dir_block)?;

        volume.sync()
    }

    /// Bind the engine to a formatted image. Loads the superblock (failing
    /// on a bad magic), rebuilds the dedup index from its persisted area,
    /// opens the cache tiers and runs WAL recovery.
    pub fn attach(volume: V, options: Options) -> Result<SmartFs<V>, Error> {
        let mut block0 = [0_u8; BLOCK_SIZE];
        volume.read_block(0, &mut block0)?;
        let superblock: Superblock = record_from_bytes(&block0);
        superblock.check_magic()?;

        // the cursor sits past every block ever allocated; the root
        // directory block is the first allocation
        let next_block = superblock.data_area_start + superblock.allocated_data_blocks();

        let mut dedup_area = vec![0_u8; DEDUP_CAPACITY * DEDUP_RECORD_SIZE];
        volume.read_at(
            superblock.dedup_area_start * BLOCK_SIZE as u64,
            &mut dedup_area,
        )?;
        let dedup = DedupIndex::load(&dedup_area);

        let cache = TieredCache::open(&options.cache)?;
        let (wal, recovered) = Wal::init(options.wal_path.clone())?;

        Ok(SmartFs {
            volume,
            superblock,
            next_block,
            dedup,
            cache,
            wal,
            stats: StorageStats::default(),
            options,
            recovered,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn stats(&self) -> &StorageStats {
        &self.stats
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Intent-log records found (and checkpointed away) at attach. Each
    /// names a block that was persisted but never committed; no inode
    /// references such a block, so they are safe to ignore.
    pub fn recovered_writes(&self) -> &[WalRecord] {
        &self.recovered
    }

    /// Whole-block rewrite of block 0. Runs on every free-count mutation,
    /// before the allocation becomes observable.
    pub(crate) fn save_superblock(&mut self) -> Result<(), Error> {
        let mut block0 = [0_u8; BLOCK_SIZE];
        let bytes = record_as_bytes(&self.superblock);
        block0[..bytes.len()].copy_from_slice(bytes);
        self.volume.write_block(0, &block0)
    }

    /// Byte offset of an inode slot in the image.
    fn inode_offset(&self, inode_id: u64) -> u64 {
        self.superblock.inode_area_start * BLOCK_SIZE as u64
            + inode_id * mem::size_of::<Inode>() as u64
    }

    pub fn load_inode(&self, inode_id: u64) -> Result<Inode, Error> {
        if inode_id >= MAX_INODES {
            return Err(Error::NotFound);
        }
        let mut buf = vec![0_u8; mem::size_of::<Inode>()];
        self.volume.read_at(self.inode_offset(inode_id), &mut buf)?;
        Ok(record_from_bytes(&buf))
    }

    /// Whole-inode rewrite; runs on every inode mutation.
    pub fn save_inode(&mut self, inode: &Inode) -> Result<(), Error> {
        let offset = self.inode_offset(inode.inode_id);
        self.volume.write_at(offset, record_as_bytes(inode))
    }

    /// Linear scan for the first free slot. Slot 0 is the root and is never
    /// handed out.
    pub fn allocate_inode(&mut self) -> Result<u64, Error> {
        for inode_id in 1..MAX_INODES {
            if self.load_inode(inode_id)?.is_free() {
                return Ok(inode_id);
            }
        }
        Err(Error::NoSpace)
    }

    /// Clear `mode` and rewrite the inode, freeing the slot.
    pub fn free_inode(&mut self, inode_id: u64) -> Result<(), Error> {
        let mut inode = self.load_inode(inode_id)?;
        inode.mode = 0;
        self.save_inode(&inode)
    }

    /// Hand out the next data block. This is a monotonic cursor, not a
    /// bitmap allocator: freed blocks are not reclaimed. The decremented
    /// free count is persisted before the block id is returned.
    pub fn allocate_block(&mut self) -> Result<u64, Error> {
        if self.superblock.free_blocks == 0 || self.next_block >= self.superblock.total_blocks {
            return Err(Error::NoSpace);
        }
        let block = self.next_block;
        self.next_block += 1;
        self.superblock.free_blocks -= 1;
        self.save_superblock()?;
        Ok(block)
    }

    pub fn statfs(&self) -> FsStat {
        FsStat {
            total_blocks: self.superblock.total_blocks,
            free_blocks: self.superblock.free_blocks,
            block_size: BLOCK_SIZE,
        }
    }

    /// The `getattr` view of an inode.
    pub fn stat(&self, inode_id: u64) -> Result<Metadata, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        let latest = inode.latest();
        Ok(Metadata {
            inode_id: inode.inode_id,
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            link_count: inode.link_count,
            size: latest.map(|v| v.file_size).unwrap_or(0),
            mtime: latest.map(|v| v.timestamp).unwrap_or(0),
            total_versions: inode.total_versions,
        })
    }

    /// The rendered storage-efficiency report.
    pub fn storage_report(&self) -> String {
        let remaining = self.superblock.free_blocks * BLOCK_SIZE as u64;
        self.stats.report(remaining)
    }

    /// Cut a snapshot of an inode with the given commit message, keeping
    /// dedup reference counts in step with the version set.
    pub fn create_snapshot(&mut self, inode_id: u64, commit_msg: &str) -> Result<u32, Error> {
        let mut inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        let new_id = self.snapshot_with_refs(&mut inode, commit_msg, version::now_secs())?;
        self.save_inode(&inode)?;
        Ok(new_id)
    }

    /// Flip a version's pin flag; returns the new state.
    pub fn toggle_pin(&mut self, inode_id: u64, version_id: u32) -> Result<bool, Error> {
        let mut inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        let pinned = version::toggle_pin(&mut inode, version_id)?;
        self.save_inode(&inode)?;
        Ok(pinned)
    }

    /// Render the version listing into `buf`; returns the bytes written.
    pub fn list_versions(&self, inode_id: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        Ok(version::list_versions(&inode, buf))
    }

    /// Store an extended attribute on an inode.
    pub fn set_xattr(&mut self, inode_id: u64, name: &str, value: &str) -> Result<(), Error> {
        let mut inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        inode.set_xattr(name, value)?;
        self.save_inode(&inode)
    }

    pub fn get_xattr(&self, inode_id: u64, name: &str) -> Result<String, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        inode
            .get_xattr(name)
            .map(str::to_owned)
            .ok_or(Error::NotFound)
    }

    pub fn remove_xattr(&mut self, inode_id: u64, name: &str) -> Result<(), Error> {
        let mut inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        inode.remove_xattr(name)?;
        self.save_inode(&inode)
    }

    pub fn list_xattrs(&self, inode_id: u64) -> Result<Vec<String>, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        Ok(inode.xattr_names().map(str::to_owned).collect())
    }

    /// Full image copy to `path`. Incremental backups are not implemented.
    pub fn backup_to(&self, path: &Path, full: bool) -> Result<(), Error> {
        if !full {
            return Err(Error::NotSupported);
        }
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut out = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        let mut buf = [0_u8; BLOCK_SIZE];
        for block in 0..self.superblock.total_blocks {
            self.volume.read_block(block, &mut buf)?;
            out.write_all(&buf)?;
        }
        out.sync_data().map_err(Error::from)
    }

    /// Push the superblock and every buffered byte of the image down to
    /// durable storage.
    pub fn sync(&mut self) -> Result<(), Error> {
        self.save_superblock()?;
        self.volume.sync()
    }

    pub(crate) fn persist_dedup_slot(&mut self, slot: usize) -> Result<(), Error> {
        let offset =
            self.superblock.dedup_area_start * BLOCK_SIZE as u64 + DedupIndex::slot_offset(slot);
        // slot records never straddle the area's end: 1024 * 48 bytes fill
        // exactly 12 blocks
        let bytes: Vec<u8> = self.dedup.slot_bytes(slot).to_vec();
        self.volume.write_at(offset, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::superblock::SMARTFS_MAGIC;

    pub(crate) fn test_options() -> Options {
        let tag = rand::random::<u32>();
        Options {
            cache: CacheConfig {
                l1_capacity: 8,
                l2_capacity: 32,
                l2_path: std::env::temp_dir().join(format!("smartfs_test_l2_{}.cache", tag)),
            },
            wal_path: std::env::temp_dir().join(format!("smartfs_test_{}.wal", tag)),
            snapshot_interval: 60,
        }
    }

    pub(crate) fn fresh_fs() -> SmartFs<Vec<u8>> {
        let mut volume = vec![0_u8; 2048 * BLOCK_SIZE];
        SmartFs::format(&mut volume).unwrap();
        SmartFs::attach(volume, test_options()).unwrap()
    }

    #[test]
    fn format_then_attach() {
        let fs = fresh_fs();
        assert_eq!(fs.superblock().magic, SMARTFS_MAGIC);
        assert_eq!(fs.superblock().total_blocks, 2048);
        assert_eq!(fs.superblock().free_blocks, 2048 - DATA_AREA_START - 1);
        assert!(fs.recovered_writes().is_empty());

        let root = fs.load_inode(0).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.link_count, 2);
        assert_eq!(root.total_versions, 1);
        assert_eq!(
            root.latest().unwrap().block_list_start,
            fs.superblock().data_area_start
        );
    }

    #[test]
    fn attach_rejects_foreign_image() {
        let volume = vec![0_u8; 2048 * BLOCK_SIZE];
        match SmartFs::attach(volume, test_options()) {
            Err(Error::BadMagic(0)) => {}
            other => panic!("expected BadMagic, got {:?}", other.err()),
        }
    }

    #[test]
    fn format_refuses_tiny_volume() {
        let mut volume = vec![0_u8; 16 * BLOCK_SIZE];
        assert_eq!(SmartFs::format(&mut volume), Err(Error::NoSpace));
    }

    #[test]
    fn inode_allocation_scans_linearly() {
        let mut fs = fresh_fs();
        let first = fs.allocate_inode().unwrap();
        assert_eq!(first, 1);

        // the slot is only taken once it is persisted live
        let mut inode = Inode::new(first, TypePerm::FILE.bits() | 0o644, 0, 0);
        version::init_inode(&mut inode);
        fs.save_inode(&inode).unwrap();
        assert_eq!(fs.allocate_inode().unwrap(), 2);

        fs.free_inode(first).unwrap();
        assert_eq!(fs.allocate_inode().unwrap(), 1);
    }

    #[test]
    fn block_allocator_is_monotonic_and_persists() {
        let mut fs = fresh_fs();
        let data_start = fs.superblock().data_area_start;
        let free_before = fs.superblock().free_blocks;

        let a = fs.allocate_block().unwrap();
        let b = fs.allocate_block().unwrap();
        assert_eq!(a, data_start + 1);
        assert_eq!(b, data_start + 2);
        assert_eq!(fs.superblock().free_blocks, free_before - 2);

        // the free count round-trips the image, so the cursor rederives
        let volume = std::mem::take(&mut fs.volume);
        let fs2 = SmartFs::attach(volume, test_options()).unwrap();
        assert_eq!(fs2.superblock().free_blocks, free_before - 2);
        assert_eq!(fs2.next_block, data_start + 3);
    }

    #[test]
    fn allocator_exhaustion() {
        let mut volume = vec![0_u8; (DATA_AREA_START as usize + 4) * BLOCK_SIZE];
        SmartFs::format(&mut volume).unwrap();
        let mut fs = SmartFs::attach(volume, test_options()).unwrap();

        // root block is taken; three blocks remain
        for _ in 0..3 {
            fs.allocate_block().unwrap();
        }
        assert_eq!(fs.allocate_block(), Err(Error::NoSpace));
    }

    #[test]
    fn statfs_reflects_superblock() {
        let fs = fresh_fs();
        let stat = fs.statfs();
        assert_eq!(stat.total_blocks, 2048);
        assert_eq!(stat.block_size, BLOCK_SIZE);
        assert_eq!(stat.free_blocks, fs.superblock().free_blocks);
    }

    #[test]
    fn stat_of_root() {
        let fs = fresh_fs();
        let meta = fs.stat(0).unwrap();
        assert_eq!(meta.link_count, 2);
        assert_eq!(meta.size, BLOCK_SIZE as u64);
        assert_eq!(meta.total_versions, 1);
        assert_eq!(fs.stat(5), Err(Error::NotFound));
    }

    #[test]
    fn xattr_plumbing_persists() {
        let mut fs = fresh_fs();
        fs.set_xattr(0, "user.author", "smartfs").unwrap();
        assert_eq!(fs.get_xattr(0, "user.author").unwrap(), "smartfs");
        assert_eq!(fs.list_xattrs(0).unwrap(), vec!["user.author".to_owned()]);

        fs.remove_xattr(0, "user.author").unwrap();
        assert_eq!(fs.get_xattr(0, "user.author"), Err(Error::NotFound));
        assert_eq!(fs.remove_xattr(0, "user.author"), Err(Error::NotFound));
    }

    #[test]
    fn backup_copies_the_image() {
        let fs = fresh_fs();
        let path = std::env::temp_dir().join(format!("smartfs_bak_{}.img", rand::random::<u32>()));

        assert_eq!(fs.backup_to(&path, false), Err(Error::NotSupported));
        fs.backup_to(&path, true).unwrap();

        let copied = std::fs::read(&path).unwrap();
        assert_eq!(copied.len(), 2048 * BLOCK_SIZE);
        assert_eq!(&copied[..8], &SMARTFS_MAGIC.to_le_bytes()[..]);

        let _ = std::fs::remove_file(&path);
    }
}

//! The tiered block cache.
//!
//! L1 is an in-memory LRU of decompressed block buffers; L2 is a
//! direct-mapped, memory-mapped overflow table. The promotion policy lives
//! in this facade: an L1 eviction is always spilled to L2 before the new
//! block lands, and an L2 hit is re-admitted to L1 on its way back to the
//! caller. A block admitted through [`TieredCache::put`] therefore stays
//! reachable through [`TieredCache::get`] until both tiers have let go of
//! it.

pub mod l2;
pub mod lru;

use std::path::PathBuf;

use crate::error::Error;
use crate::sys::BLOCK_SIZE;

use self::l2::L2Cache;
use self::lru::LruCache;

/// Sizing and placement of the two tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Blocks held in RAM.
    pub l1_capacity: usize,
    /// Slots in the overflow table.
    pub l2_capacity: usize,
    /// Backing file of the overflow table.
    pub l2_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            l1_capacity: 64,
            l2_capacity: 256,
            l2_path: PathBuf::from("/tmp/smartfs_l2.cache"),
        }
    }
}

pub struct TieredCache {
    l1: LruCache,
    l2: L2Cache,
}

impl TieredCache {
    pub fn open(config: &CacheConfig) -> Result<TieredCache, Error> {
        Ok(TieredCache {
            l1: LruCache::new(config.l1_capacity),
            l2: L2Cache::open(&config.l2_path, config.l2_capacity)?,
        })
    }

    /// Admit a block. `data` may be shorter than a block; the buffer is
    /// zero-padded, so cached reads past the content see zeros.
    pub fn put(&mut self, block: u64, data: &[u8]) -> Result<(), Error> {
        assert!(data.len() <= BLOCK_SIZE);
        let mut buf = Box::new([0_u8; BLOCK_SIZE]);
        buf[..data.len()].copy_from_slice(data);
        if let Some((spilled, spilled_data)) = self.l1.insert(block, buf) {
            self.l2.put(spilled, &spilled_data)?;
        }
        Ok(())
    }

    /// Look a block up, L1 first. An L2 hit is promoted back into L1
    /// (possibly spilling the current L1 tail) before returning.
    pub fn get(&mut self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<bool, Error> {
        if self.l1.get(block, out) {
            return Ok(true);
        }
        if self.l2.get(block, out) {
            self.put(block, &out[..])?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop a block from both tiers.
    pub fn invalidate(&mut self, block: u64) -> Result<(), Error> {
        self.l1.remove(block);
        self.l2.invalidate(block)
    }

    /// L1 residents from most to least recently used (diagnostics).
    pub fn l1_blocks(&self) -> Vec<u64> {
        self.l1.blocks_mru()
    }
}

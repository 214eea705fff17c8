use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::Error;
use crate::sys::BLOCK_SIZE;

/// Per-slot header: a validity word and the owning block id.
const SLOT_HEADER: usize = 16;
/// Bytes of one direct-mapped slot.
pub const SLOT_SIZE: usize = SLOT_HEADER + BLOCK_SIZE;

/// The L2 tier: a direct-mapped table of block-sized slots backed by a
/// memory-mapped file. The slot for a block is `block_id mod capacity`, so
/// a colliding admission simply overwrites its predecessor. Every `put` is
/// pushed to the mapping's backing file before returning.
pub struct L2Cache {
    map: MmapMut,
    capacity: usize,
}

impl L2Cache {
    /// Map (creating if needed) the overflow file with `capacity` slots.
    /// The file is user-only, like every auxiliary SmartFS file.
    pub fn open(path: &Path, capacity: usize) -> Result<L2Cache, Error> {
        assert!(capacity > 0, "L2 capacity must be at least 1");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)?;
        file.set_len((capacity * SLOT_SIZE) as u64)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(L2Cache { map, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot_base(&self, block: u64) -> usize {
        (block % self.capacity as u64) as usize * SLOT_SIZE
    }

    /// Overwrite the direct-mapped slot for `block` and sync it down.
    pub fn put(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        let base = self.slot_base(block);
        self.map[base..base + 8].copy_from_slice(&1_u64.to_le_bytes());
        self.map[base + 8..base + SLOT_HEADER].copy_from_slice(&block.to_le_bytes());
        self.map[base + SLOT_HEADER..base + SLOT_SIZE].copy_from_slice(data);
        self.map.flush_range(base, SLOT_SIZE)?;
        Ok(())
    }

    /// Copy the block out of its slot, if the slot still belongs to it.
    pub fn get(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> bool {
        let base = self.slot_base(block);
        let valid = u64::from_le_bytes(self.map[base..base + 8].try_into().unwrap());
        let owner = u64::from_le_bytes(self.map[base + 8..base + SLOT_HEADER].try_into().unwrap());
        if valid != 1 || owner != block {
            return false;
        }
        out.copy_from_slice(&self.map[base + SLOT_HEADER..base + SLOT_SIZE]);
        true
    }

    /// Drop the block's slot if it still belongs to it.
    pub fn invalidate(&mut self, block: u64) -> Result<(), Error> {
        let base = self.slot_base(block);
        let owner = u64::from_le_bytes(self.map[base + 8..base + SLOT_HEADER].try_into().unwrap());
        if owner == block {
            self.map[base..base + 8].copy_from_slice(&0_u64.to_le_bytes());
            self.map.flush_range(base, 8)?;
        }
        Ok(())
    }
}

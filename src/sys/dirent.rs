use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};

use crate::error::Error;
use crate::sys::{c_str, set_c_str, Record, BLOCK_SIZE, MAX_FILENAME};

/// Directory entries per directory block.
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / std::mem::size_of::<DirEntry>();

/// One slot in a directory's data block. An entry is visible iff
/// `is_valid == 1`; removal clears the whole slot so it can be reused
/// first-fit.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    /// NUL-padded entry name
    pub name: [u8; 255],
    /// `1` when the slot is in use
    pub is_valid: u8,
    /// Inode id the name resolves to
    pub inode_no: u64,
}

unsafe impl Record for DirEntry {}

impl Default for DirEntry {
    fn default() -> DirEntry {
        DirEntry {
            name: [0; 255],
            is_valid: 0,
            inode_no: 0,
        }
    }
}

impl DirEntry {
    /// Build a valid entry, rejecting names that cannot fit the slot.
    pub fn new(name: &str, inode_no: u64) -> Result<DirEntry, Error> {
        if name.is_empty() || name.len() > MAX_FILENAME {
            return Err(Error::InvalidArgument);
        }
        let mut entry = DirEntry {
            is_valid: 1,
            inode_no,
            ..DirEntry::default()
        };
        set_c_str(&mut entry.name, name);
        Ok(entry)
    }

    pub fn name(&self) -> &str {
        c_str(&self.name).unwrap_or("")
    }

    pub fn matches(&self, name: &str) -> bool {
        self.is_valid == 1 && self.name() == name
    }

    /// Clear name bytes, inode id and validity in one go.
    pub fn clear(&mut self) {
        *self = DirEntry::default();
    }
}

impl Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &self.name())
            .field("inode_no", &self.inode_no)
            .field("is_valid", &self.is_valid)
            .finish()
    }
}

/// A directory's single data block: a fixed-count array of entries plus
/// tail padding up to the block size.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirBlock {
    entries: [DirEntry; DIR_ENTRIES_PER_BLOCK],
    #[doc(hidden)]
    _pad: [u8; BLOCK_SIZE - DIR_ENTRIES_PER_BLOCK * std::mem::size_of::<DirEntry>()],
}

unsafe impl Record for DirBlock {}

impl Default for DirBlock {
    fn default() -> DirBlock {
        DirBlock {
            entries: [DirEntry::default(); DIR_ENTRIES_PER_BLOCK],
            _pad: [0; BLOCK_SIZE - DIR_ENTRIES_PER_BLOCK * std::mem::size_of::<DirEntry>()],
        }
    }
}

impl Deref for DirBlock {
    type Target = [DirEntry; DIR_ENTRIES_PER_BLOCK];
    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl DerefMut for DirBlock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

impl DirBlock {
    /// The block every `mkdir` starts from: `"."` and `".."` materialised.
    pub fn with_dot_entries(own: u64, parent: u64) -> DirBlock {
        let mut block = DirBlock::default();
        block.entries[0] = DirEntry::new(".", own).expect("dot name fits");
        block.entries[1] = DirEntry::new("..", parent).expect("dotdot name fits");
        block
    }

    /// Valid entries, in slot order.
    pub fn live(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| e.is_valid == 1)
    }

    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.matches(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut DirEntry> {
        self.entries.iter_mut().find(|e| e.matches(name))
    }

    /// First-fit insert into an invalid slot.
    pub fn insert(&mut self, name: &str, inode_no: u64) -> Result<(), Error> {
        let entry = DirEntry::new(name, inode_no)?;
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_valid == 0)
            .ok_or(Error::NoSpace)?;
        *slot = entry;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_exactly_one_block() {
        assert_eq!(std::mem::size_of::<DirBlock>(), BLOCK_SIZE);
        assert_eq!(DIR_ENTRIES_PER_BLOCK, 15);
    }

    #[test]
    fn dot_entries() {
        let block = DirBlock::with_dot_entries(5, 0);
        assert_eq!(block.find(".").unwrap().inode_no, 5);
        assert_eq!(block.find("..").unwrap().inode_no, 0);
        assert_eq!(block.live().count(), 2);
    }

    #[test]
    fn insert_until_full() {
        let mut block = DirBlock::with_dot_entries(1, 0);
        for i in 0..(DIR_ENTRIES_PER_BLOCK - 2) {
            block.insert(&format!("f{}", i), 10 + i as u64).unwrap();
        }
        assert_eq!(block.insert("overflow", 99), Err(Error::NoSpace));

        // clearing a slot makes room again, first-fit
        block.find_mut("f3").unwrap().clear();
        block.insert("overflow", 99).unwrap();
        assert_eq!(block.find("overflow").unwrap().inode_no, 99);
        assert!(block.find("f3").is_none());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(DirEntry::new("", 1).is_err());
        assert!(DirEntry::new(&"n".repeat(255), 1).is_err());
        assert!(DirEntry::new(&"n".repeat(254), 1).is_ok());
    }
}

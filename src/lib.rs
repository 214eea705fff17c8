//! SmartFS: a user-space filesystem image over a single backing file.
//!
//! The crate is the storage engine only. It owns the on-disk layout
//! (superblock, inode area, dedup area, data area), the smart write/read
//! pipeline (fingerprint, dedup, compression, placement), the tiered block
//! cache, the per-inode version chains and the write-ahead log. Host
//! integration (FUSE or otherwise) is expected to live in a thin shim that
//! translates filesystem calls into [`fs::SmartFs`] methods.

#[macro_use]
extern crate bitflags;

pub mod cache;
pub mod compress;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod path;
pub mod stats;
pub mod sys;
pub mod version;
pub mod volume;
pub mod wal;

pub use crate::error::Error;
pub use crate::fs::sync::Synced;
pub use crate::fs::SmartFs;
pub use crate::sys::BLOCK_SIZE;

#[cfg(test)]
mod tests {
    use crate::sys::dirent::DirEntry;
    use crate::sys::inode::{Inode, VersionEntry, XattrEntry};
    use crate::sys::superblock::Superblock;

    #[test]
    fn sizes() {
        use std::mem::size_of;
        assert_eq!(size_of::<Superblock>(), 72);
        assert_eq!(size_of::<VersionEntry>(), 104);
        assert_eq!(size_of::<XattrEntry>(), 68);
        assert_eq!(size_of::<Inode>(), 13616);
        assert_eq!(size_of::<DirEntry>(), 264);
    }
}

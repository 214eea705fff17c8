//! The inode and directory model.
//!
//! A directory is one data block holding a fixed-count array of entries;
//! its inode versions like any other, but directory content is written in
//! place (image-resident, no length prefix) and bypasses the dedup
//! pipeline. Path resolution walks `/`-separated components from the root
//! directory, after stripping any version suffix.

use crate::error::Error;
use crate::fs::SmartFs;
use crate::path::parse_version_path;
use crate::sys::dirent::DirBlock;
use crate::sys::inode::{Inode, TypePerm};
use crate::sys::{record_as_bytes, record_from_bytes, BLOCK_SIZE};
use crate::version;
use crate::volume::Volume;

impl<V: Volume> SmartFs<V> {
    fn dir_block_id(&self, dir: &Inode) -> Result<u64, Error> {
        if !dir.is_dir() {
            return Err(Error::InvalidArgument);
        }
        match dir.latest().map(|v| v.block_list_start) {
            Some(block) if block != 0 => Ok(block),
            _ => Err(Error::NotFound),
        }
    }

    pub(crate) fn load_dir_block(&self, dir: &Inode) -> Result<(u64, DirBlock), Error> {
        let block = self.dir_block_id(dir)?;
        let raw = self.read_raw_block(block)?;
        Ok((block, record_from_bytes(&raw)))
    }

    pub(crate) fn save_dir_block(&mut self, block: u64, dir_block: &DirBlock) -> Result<(), Error> {
        let mut raw = [0_u8; BLOCK_SIZE];
        raw.copy_from_slice(record_as_bytes(dir_block));
        self.write_raw_block(block, &raw)
    }

    /// Linear scan of a directory's valid entries for `name`.
    pub fn find_entry_in_dir(&self, dir_id: u64, name: &str) -> Result<Option<u64>, Error> {
        let dir = self.load_inode(dir_id)?;
        if dir.is_free() {
            return Err(Error::NotFound);
        }
        let (_, block) = self.load_dir_block(&dir)?;
        Ok(block.find(name).map(|entry| entry.inode_no))
    }

    /// First-fit insert of `name -> child` into the directory block.
    pub(crate) fn add_dir_entry(&mut self, dir_id: u64, name: &str, child: u64) -> Result<(), Error> {
        let dir = self.load_inode(dir_id)?;
        let (block_id, mut block) = self.load_dir_block(&dir)?;
        block.insert(name, child)?;
        self.save_dir_block(block_id, &block)
    }

    /// Clear the entry for `name` and persist the block. Returns the inode
    /// id the entry pointed at.
    pub(crate) fn remove_dir_entry(&mut self, dir_id: u64, name: &str) -> Result<u64, Error> {
        let dir = self.load_inode(dir_id)?;
        let (block_id, mut block) = self.load_dir_block(&dir)?;
        let entry = block.find_mut(name).ok_or(Error::NotFound)?;
        let child = entry.inode_no;
        entry.clear();
        self.save_dir_block(block_id, &block)?;
        Ok(child)
    }

    /// Walk `path` from the root directory, one component per directory
    /// level. A version suffix is stripped before walking.
    pub fn resolve_path(&self, path: &str) -> Result<u64, Error> {
        let (real, _) = parse_version_path(path);
        let mut current = self.superblock.root_inode;
        for component in real.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let dir = self.load_inode(current)?;
            if dir.is_free() {
                return Err(Error::NotFound);
            }
            let (_, block) = self.load_dir_block(&dir)?;
            current = block
                .find(component)
                .map(|entry| entry.inode_no)
                .ok_or(Error::NotFound)?;
        }
        Ok(current)
    }

    /// Entries of a directory, `"."`/`".."` included.
    pub fn read_dir(&self, dir_id: u64) -> Result<Vec<(String, u64)>, Error> {
        let dir = self.load_inode(dir_id)?;
        if dir.is_free() {
            return Err(Error::NotFound);
        }
        let (_, block) = self.load_dir_block(&dir)?;
        Ok(block
            .live()
            .map(|entry| (entry.name().to_owned(), entry.inode_no))
            .collect())
    }

    /// Split a path into its parent directory's inode and the leaf name.
    fn split_parent_leaf<'a>(&self, path: &'a str) -> Result<(u64, &'a str), Error> {
        let (real, _) = parse_version_path(path);
        let trimmed = real.trim_end_matches('/');
        let (parent_path, leaf) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if leaf.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let parent = if parent_path.is_empty() {
            self.superblock.root_inode
        } else {
            self.resolve_path(parent_path)?
        };
        Ok((parent, leaf))
    }

    /// Fail early when the new entry could not land: the name is taken or
    /// the directory block is full.
    fn prepare_entry(&self, parent: u64, leaf: &str) -> Result<(), Error> {
        let dir = self.load_inode(parent)?;
        if dir.is_free() {
            return Err(Error::NotFound);
        }
        let (_, block) = self.load_dir_block(&dir)?;
        if block.find(leaf).is_some() {
            return Err(Error::InvalidArgument);
        }
        if block.iter().all(|entry| entry.is_valid == 1) {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    fn new_inode(&mut self, mode: u32) -> Result<Inode, Error> {
        let inode_id = self.allocate_inode()?;
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let mut inode = Inode::new(inode_id, mode, uid, gid);
        version::init_inode(&mut inode);
        Ok(inode)
    }

    /// Create a regular file. Its `v1` is cut with empty content; link
    /// count starts at 1.
    pub fn create(&mut self, path: &str, perm: u32) -> Result<u64, Error> {
        let (parent, leaf) = self.split_parent_leaf(path)?;
        self.prepare_entry(parent, leaf)?;

        let inode = self.new_inode(TypePerm::FILE.bits() | (perm & 0o777))?;
        self.save_inode(&inode)?;
        self.add_dir_entry(parent, leaf, inode.inode_id)?;
        Ok(inode.inode_id)
    }

    /// Create a directory with `"."` and `".."` materialised. Link count
    /// starts at 2.
    pub fn mkdir(&mut self, path: &str, perm: u32) -> Result<u64, Error> {
        let (parent, leaf) = self.split_parent_leaf(path)?;
        self.prepare_entry(parent, leaf)?;

        let block = self.allocate_block()?;
        let mut inode = self.new_inode(TypePerm::DIRECTORY.bits() | (perm & 0o777))?;
        inode.link_count = 2;
        {
            let v1 = inode.latest_mut().expect("init_inode cut v1");
            v1.file_size = BLOCK_SIZE as u64;
            v1.block_count = 1;
            v1.block_list_start = block;
        }
        self.save_inode(&inode)?;
        self.save_dir_block(block, &DirBlock::with_dot_entries(inode.inode_id, parent))?;
        self.add_dir_entry(parent, leaf, inode.inode_id)?;
        Ok(inode.inode_id)
    }

    /// Create a symbolic link holding `target`. Link count starts at 1.
    pub fn symlink(&mut self, target: &str, path: &str) -> Result<u64, Error> {
        if target.is_empty() || target.len() > BLOCK_SIZE {
            return Err(Error::InvalidArgument);
        }
        let (parent, leaf) = self.split_parent_leaf(path)?;
        self.prepare_entry(parent, leaf)?;

        let block = self.allocate_block()?;
        let mut inode = self.new_inode(TypePerm::SYMLINK.bits() | 0o777)?;
        {
            let v1 = inode.latest_mut().expect("init_inode cut v1");
            v1.file_size = target.len() as u64;
            v1.block_count = 1;
            v1.block_list_start = block;
        }
        let mut raw = [0_u8; BLOCK_SIZE];
        raw[..target.len()].copy_from_slice(target.as_bytes());
        self.save_inode(&inode)?;
        self.write_raw_block(block, &raw)?;
        self.add_dir_entry(parent, leaf, inode.inode_id)?;
        Ok(inode.inode_id)
    }

    /// The target a symlink points at.
    pub fn read_link(&self, path: &str) -> Result<String, Error> {
        let inode = self.load_inode(self.resolve_path(path)?)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        if !inode.is_symlink() {
            return Err(Error::InvalidArgument);
        }
        let entry = inode.latest().ok_or(Error::NotFound)?;
        let raw = self.read_raw_block(entry.block_list_start)?;
        String::from_utf8(raw[..entry.file_size as usize].to_vec())
            .map_err(|_| Error::InvalidArgument)
    }

    /// Hard-link `existing` under `new_path`, bumping the link count.
    /// Directories cannot be hard-linked.
    pub fn link(&mut self, existing: &str, new_path: &str) -> Result<(), Error> {
        let target = self.resolve_path(existing)?;
        let mut inode = self.load_inode(target)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        if inode.is_dir() {
            return Err(Error::InvalidArgument);
        }
        let (parent, leaf) = self.split_parent_leaf(new_path)?;
        self.prepare_entry(parent, leaf)?;

        inode.link_count += 1;
        self.save_inode(&inode)?;
        self.add_dir_entry(parent, leaf, target)
    }

    /// Remove a directory entry, dropping the inode (and every version's
    /// block reference) when its link count reaches zero.
    pub fn unlink(&mut self, path: &str) -> Result<(), Error> {
        let (parent, leaf) = self.split_parent_leaf(path)?;
        let child = self
            .find_entry_in_dir(parent, leaf)?
            .ok_or(Error::NotFound)?;
        let mut inode = self.load_inode(child)?;
        if inode.is_dir() {
            return Err(Error::InvalidArgument);
        }

        self.remove_dir_entry(parent, leaf)?;
        inode.link_count = inode.link_count.saturating_sub(1);
        if inode.link_count > 0 {
            return self.save_inode(&inode);
        }

        // last link gone: release every version's block reference. The
        // monotonic allocator never reuses blocks, so cached copies of
        // still-shared content stay valid.
        let blocks: Vec<u64> = inode
            .live_versions()
            .iter()
            .filter(|v| v.block_list_start != 0)
            .map(|v| v.block_list_start)
            .collect();
        for block in blocks {
            if let Some(slot) = self.dedup.dec_ref_block(block) {
                self.persist_dedup_slot(slot)?;
            }
        }
        inode.mode = 0;
        self.save_inode(&inode)
    }

    /// Move an entry to a new name and/or directory. Link counts are not
    /// touched. The destination must not exist.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let (old_parent, old_leaf) = self.split_parent_leaf(old_path)?;
        let (new_parent, new_leaf) = self.split_parent_leaf(new_path)?;
        if self
            .find_entry_in_dir(old_parent, old_leaf)?
            .is_none()
        {
            return Err(Error::NotFound);
        }
        self.prepare_entry(new_parent, new_leaf)?;

        let child = self.remove_dir_entry(old_parent, old_leaf)?;
        self.add_dir_entry(new_parent, new_leaf, child)
    }
}

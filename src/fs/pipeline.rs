//! The smart write/read pipeline.
//!
//! A write runs fingerprint -> dedup lookup -> compression -> block
//! placement -> index, with the WAL framing the physical write and the
//! cache populated with the decompressed bytes so a re-read skips one
//! decompression. A read inverts the path, consulting the cache before the
//! physical store.
//!
//! Durability ordering inside a write: allocate, WAL begin, WAL log,
//! physical write, WAL commit, update inode, save superblock. A crash
//! between log and commit leaves a detectable uncommitted block that no
//! inode references yet.

use crate::compress;
use crate::error::Error;
use crate::fingerprint::Fingerprint;
use crate::fs::SmartFs;
use crate::path::{parse_version_path, VersionQuery};
use crate::sys::inode::{Inode, VersionEntry};
use crate::sys::BLOCK_SIZE;
use crate::version;
use crate::volume::Volume;

/// What a pipeline write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes accepted (the caller's length).
    pub bytes_written: usize,
    /// Logical block now holding the content.
    pub block: u64,
    /// Whether an existing block satisfied the write.
    pub deduplicated: bool,
}

impl<V: Volume> SmartFs<V> {
    /// Run one block payload through the write pipeline. Returns the block
    /// that holds the content afterwards, which is an existing block when
    /// the fingerprint was already indexed.
    pub fn smart_write(&mut self, data: &[u8]) -> Result<WriteOutcome, Error> {
        if data.is_empty() {
            return Ok(WriteOutcome {
                bytes_written: 0,
                block: 0,
                deduplicated: false,
            });
        }
        if data.len() > BLOCK_SIZE {
            return Err(Error::TooBig);
        }
        self.stats.total_logical_bytes += data.len() as u64;

        let fingerprint = Fingerprint::of(data);
        if let Some(record) = self.dedup.lookup(&fingerprint) {
            let block = record.block_id;
            self.stats.deduplication_count += 1;
            if let Some(slot) = self.dedup.inc_ref(&fingerprint) {
                self.persist_dedup_slot(slot)?;
            }
            // keep the content hot; no disk traffic
            self.cache.put(block, data)?;
            return Ok(WriteOutcome {
                bytes_written: data.len(),
                block,
                deduplicated: true,
            });
        }

        let compressed = compress::compress(data);
        if compressed.len() > crate::fs::store::MAX_BODY {
            // a full incompressible block cannot carry its length prefix
            return Err(Error::TooBig);
        }
        self.stats.bytes_after_dedup += data.len() as u64;
        self.stats.total_physical_bytes += compressed.len() as u64;

        let block = self.allocate_block()?;
        self.wal.begin();
        // the log is advisory: a failed append never aborts the write
        let _ = self.wal.log_write(block, &compressed);
        self.physical_write(block, &compressed)?;
        let _ = self.wal.commit();

        if let Some(slot) = self.dedup.insert(&fingerprint, block, compressed.len() as u32) {
            self.persist_dedup_slot(slot)?;
        }
        self.cache.put(block, data)?;

        Ok(WriteOutcome {
            bytes_written: data.len(),
            block,
            deduplicated: false,
        })
    }

    /// Read a logical block into `out`, cache first. A miss in both the
    /// cache and the physical store zeroes `out` and returns 0.
    pub fn smart_read(&mut self, block: u64, out: &mut [u8]) -> Result<usize, Error> {
        if out.is_empty() {
            return Ok(0);
        }
        if block == 0 {
            // the "no data" sentinel
            out.iter_mut().for_each(|b| *b = 0);
            return Ok(0);
        }

        let mut buf = [0_u8; BLOCK_SIZE];
        if self.cache.get(block, &mut buf)? {
            let n = out.len().min(BLOCK_SIZE);
            out[..n].copy_from_slice(&buf[..n]);
            return Ok(n);
        }

        match self.physical_read(block)? {
            None => {
                out.iter_mut().for_each(|b| *b = 0);
                Ok(0)
            }
            Some(body) => {
                let plain = compress::decompress(&body, BLOCK_SIZE);
                self.cache.put(block, &plain)?;
                let n = out.len().min(plain.len());
                out[..n].copy_from_slice(&plain[..n]);
                Ok(n)
            }
        }
    }

    /// Cut a snapshot on a loaded inode, keeping dedup reference counts in
    /// step: the new entry adds a reference to the inherited block, a
    /// rotated-out entry drops one.
    pub(crate) fn snapshot_with_refs(
        &mut self,
        inode: &mut Inode,
        commit_msg: &str,
        now: i64,
    ) -> Result<u32, Error> {
        let (new_id, rotated) = version::create_snapshot_rotating(inode, commit_msg, now)?;
        if let Some(block) = inode.latest().map(|v| v.block_list_start) {
            if block != 0 {
                if let Some(slot) = self.dedup.inc_ref_block(block) {
                    self.persist_dedup_slot(slot)?;
                }
            }
        }
        if let Some(victim) = rotated {
            if victim.block_list_start != 0 {
                if let Some(slot) = self.dedup.dec_ref_block(victim.block_list_start) {
                    self.persist_dedup_slot(slot)?;
                }
            }
        }
        Ok(new_id)
    }

    /// Write to a regular file at `offset`, cutting an automatic snapshot
    /// first when the interval policy calls for one. Returns the bytes
    /// accepted.
    pub fn write_file(&mut self, inode_id: u64, offset: u64, data: &[u8]) -> Result<usize, Error> {
        self.write_file_at(inode_id, offset, data, version::now_secs())
    }

    pub(crate) fn write_file_at(
        &mut self,
        inode_id: u64,
        offset: u64,
        data: &[u8],
        now: i64,
    ) -> Result<usize, Error> {
        let mut inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        if !inode.is_file() {
            return Err(Error::InvalidArgument);
        }
        if data.is_empty() {
            // a zero-byte write is a no-op: no new version, no block
            return Ok(0);
        }
        let offset = offset as usize;
        let end = offset + data.len();
        if end > BLOCK_SIZE {
            return Err(Error::TooBig);
        }

        if version::should_snapshot_at(&inode, self.options.snapshot_interval, now) {
            match self.snapshot_with_refs(&mut inode, version::AUTO_SNAPSHOT_MSG, now) {
                Ok(_) => {}
                // a fully pinned ring cannot rotate; the write then lands
                // on the latest entry in place
                Err(Error::NoSpace) => {}
                Err(err) => return Err(err),
            }
        }

        let previous = inode.latest().copied().unwrap_or_default();
        let old_block = previous.block_list_start;
        let old_size = previous.file_size as usize;

        // single-block files: assemble the version's whole content so the
        // fingerprint describes it all
        let new_size = end.max(old_size);
        let mut content = vec![0_u8; new_size];
        if old_block != 0 && old_size > 0 {
            let mut existing = [0_u8; BLOCK_SIZE];
            self.smart_read(old_block, &mut existing)?;
            content[..old_size].copy_from_slice(&existing[..old_size]);
        }
        content[offset..end].copy_from_slice(data);

        let outcome = self.smart_write(&content)?;

        {
            let latest = inode.latest_mut().ok_or(Error::InvalidArgument)?;
            latest.file_size = new_size as u64;
            latest.timestamp = now;
            latest.block_count = 1;
            latest.block_list_start = outcome.block;
        }

        if outcome.block != old_block {
            // the latest version stopped referencing its old block
            if old_block != 0 {
                if let Some(slot) = self.dedup.dec_ref_block(old_block) {
                    self.persist_dedup_slot(slot)?;
                }
            }
        } else if outcome.deduplicated {
            // rewrite of identical content: the pipeline counted a
            // reference this version already held
            if let Some(slot) = self.dedup.dec_ref_block(outcome.block) {
                self.persist_dedup_slot(slot)?;
            }
        }

        self.save_inode(&inode)?;
        Ok(data.len())
    }

    /// Read from the latest version of a regular file.
    pub fn read_file(&mut self, inode_id: u64, offset: u64, out: &mut [u8]) -> Result<usize, Error> {
        self.read_file_version(inode_id, None, offset, out)
    }

    /// Read from a specific version of a regular file. `None` addresses the
    /// latest; reading at or past the version's size returns 0.
    pub fn read_file_version(
        &mut self,
        inode_id: u64,
        query: Option<VersionQuery<'_>>,
        offset: u64,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        self.read_file_version_at(inode_id, query, offset, out, version::now_secs())
    }

    pub(crate) fn read_file_version_at(
        &mut self,
        inode_id: u64,
        query: Option<VersionQuery<'_>>,
        offset: u64,
        out: &mut [u8],
        now: i64,
    ) -> Result<usize, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        if !inode.is_file() {
            return Err(Error::InvalidArgument);
        }
        let entry = match query {
            None => version::get_version(&inode, 0),
            Some(VersionQuery::Id(id)) => version::get_version(&inode, id),
            Some(VersionQuery::Time(s)) => version::find_by_time_at(&inode, s, now),
        }
        .copied()
        .ok_or(Error::NotFound)?;

        let offset = offset as usize;
        if offset >= entry.file_size as usize || entry.block_list_start == 0 {
            return Ok(0);
        }

        let mut block_buf = [0_u8; BLOCK_SIZE];
        self.smart_read(entry.block_list_start, &mut block_buf)?;

        let n = out.len().min(entry.file_size as usize - offset);
        out[..n].copy_from_slice(&block_buf[offset..offset + n]);
        Ok(n)
    }

    /// Path-level write. Historical versions are read-only, so a version
    /// suffix is rejected outright.
    pub fn write_path(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, Error> {
        let (real, query) = parse_version_path(path);
        if query.is_some() {
            return Err(Error::ReadOnly);
        }
        let inode_id = self.resolve_path(real)?;
        self.write_file(inode_id, offset, data)
    }

    /// Path-level read, honouring `@v<N>` and `@<relative-time>` suffixes.
    pub fn read_path(&mut self, path: &str, offset: u64, out: &mut [u8]) -> Result<usize, Error> {
        let (real, query) = parse_version_path(path);
        let inode_id = self.resolve_path(real)?;
        self.read_file_version(inode_id, query, offset, out)
    }

    /// A copy of one version entry; id `0` addresses the latest.
    pub fn get_version(&self, inode_id: u64, version_id: u32) -> Result<VersionEntry, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        version::get_version(&inode, version_id)
            .copied()
            .ok_or(Error::NotFound)
    }

    /// A copy of the version live at the moment described by `time_str`.
    pub fn find_by_time_str(&self, inode_id: u64, time_str: &str) -> Result<VersionEntry, Error> {
        let inode = self.load_inode(inode_id)?;
        if inode.is_free() {
            return Err(Error::NotFound);
        }
        version::find_by_time_str(&inode, time_str)
            .copied()
            .ok_or(Error::NotFound)
    }
}

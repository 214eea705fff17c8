//! The physical block store.
//!
//! Pipeline-produced blocks live in the data area at their fixed placement
//! `block_id * BLOCK_SIZE`, as a 4-byte little-endian length prefix
//! followed by the compressed body (`0 < length <= BLOCK_SIZE - 4`). A zero
//! prefix means the slot holds no record. Directories and symlink bodies
//! bypass the prefix and occupy their block verbatim.

use std::io;

use crate::error::Error;
use crate::fs::SmartFs;
use crate::sys::BLOCK_SIZE;
use crate::volume::Volume;

/// Bytes of the length prefix in front of every stored body.
pub const LEN_PREFIX: usize = 4;

/// Largest body one block record can carry.
pub const MAX_BODY: usize = BLOCK_SIZE - LEN_PREFIX;

impl<V: Volume> SmartFs<V> {
    fn check_data_block(&self, block: u64) -> Result<(), Error> {
        if block < self.superblock.data_area_start || block >= self.superblock.total_blocks {
            return Err(Error::OutOfBounds(block));
        }
        Ok(())
    }

    /// Persist a compressed body at its block's image-resident location.
    pub(crate) fn physical_write(&mut self, block: u64, body: &[u8]) -> Result<(), Error> {
        self.check_data_block(block)?;
        if body.is_empty() || body.len() > MAX_BODY {
            return Err(Error::TooBig);
        }
        let mut record = [0_u8; BLOCK_SIZE];
        record[..LEN_PREFIX].copy_from_slice(&(body.len() as u32).to_le_bytes());
        record[LEN_PREFIX..LEN_PREFIX + body.len()].copy_from_slice(body);
        self.volume.write_block(block, &record)
    }

    /// Read back a stored body. `Ok(None)` when the slot carries no record;
    /// an impossible length prefix surfaces as an I/O failure.
    pub(crate) fn physical_read(&self, block: u64) -> Result<Option<Vec<u8>>, Error> {
        self.check_data_block(block)?;
        let mut record = [0_u8; BLOCK_SIZE];
        self.volume.read_block(block, &mut record)?;

        let length = u32::from_le_bytes(record[..LEN_PREFIX].try_into().unwrap()) as usize;
        if length == 0 {
            return Ok(None);
        }
        if length > MAX_BODY {
            return Err(Error::io_at(
                block,
                io::Error::new(io::ErrorKind::InvalidData, "stored length exceeds block"),
            ));
        }
        Ok(Some(record[LEN_PREFIX..LEN_PREFIX + length].to_vec()))
    }

    /// Read an unprefixed, image-resident block (directory or symlink
    /// body).
    pub(crate) fn read_raw_block(&self, block: u64) -> Result<[u8; BLOCK_SIZE], Error> {
        self.check_data_block(block)?;
        let mut buf = [0_u8; BLOCK_SIZE];
        self.volume.read_block(block, &mut buf)?;
        Ok(buf)
    }

    /// Write an unprefixed, image-resident block.
    pub(crate) fn write_raw_block(&mut self, block: u64, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        self.check_data_block(block)?;
        self.volume.write_block(block, buf)
    }
}

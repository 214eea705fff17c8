use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::Error;
use crate::sys::BLOCK_SIZE;

/// Byte-addressed backing storage for a filesystem image.
///
/// The engine owns exactly one volume for the lifetime of the process and
/// reaches it only through this trait: positionally, with no seek state.
/// Whole-block access is layered on top of the byte primitives because the
/// inode table packs records across block boundaries and the block store
/// writes sub-block records.
pub trait Volume {
    /// Total bytes of the image.
    fn size(&self) -> u64;

    /// Fill `buf` from the image, starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error>;

    /// Write all of `buf` to the image, starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error>;

    /// Force everything written so far down to durable storage.
    fn sync(&mut self) -> Result<(), Error>;

    /// Blocks the image holds.
    fn block_count(&self) -> u64 {
        self.size() / BLOCK_SIZE as u64
    }

    /// Positional whole-block read. Failures carry the block id.
    fn read_block(&self, block: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error> {
        if block >= self.block_count() {
            return Err(Error::OutOfBounds(block));
        }
        self.read_at(block * BLOCK_SIZE as u64, buf)
            .map_err(|err| tag_block(err, block))
    }

    /// Positional whole-block write. Failures carry the block id.
    fn write_block(&mut self, block: u64, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        if block >= self.block_count() {
            return Err(Error::OutOfBounds(block));
        }
        self.write_at(block * BLOCK_SIZE as u64, buf)
            .map_err(|err| tag_block(err, block))
    }
}

fn tag_block(err: Error, block: u64) -> Error {
    match err {
        Error::Io {
            block: None,
            source,
        } => Error::io_at(block, source),
        other => other,
    }
}

/// A disk image bound to an open file descriptor. All access is positional
/// (`pread`/`pwrite`), so the descriptor carries no cursor state.
impl Volume for File {
    fn size(&self) -> u64 {
        self.metadata().map(|meta| meta.len()).unwrap_or(0)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        FileExt::read_exact_at(self, buf, offset).map_err(Error::from)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        FileExt::write_all_at(self, buf, offset).map_err(Error::from)
    }

    fn sync(&mut self) -> Result<(), Error> {
        self.sync_data().map_err(Error::from)
    }
}

/// An in-memory image; what the tests run against.
impl Volume for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or(Error::OutOfBounds(offset / BLOCK_SIZE as u64))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or(Error::OutOfBounds(offset / BLOCK_SIZE as u64))?;
        self[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_round_trip() {
        let mut volume = vec![0_u8; 4 * BLOCK_SIZE];
        let mut block = [0_u8; BLOCK_SIZE];
        block[0] = 0xab;
        block[BLOCK_SIZE - 1] = 0xcd;

        volume.write_block(2, &block).unwrap();

        let mut read = [0_u8; BLOCK_SIZE];
        volume.read_block(2, &mut read).unwrap();
        assert_eq!(read[0], 0xab);
        assert_eq!(read[BLOCK_SIZE - 1], 0xcd);

        // neighbours untouched
        volume.read_block(1, &mut read).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn block_past_end_is_rejected() {
        let mut volume = vec![0_u8; 2 * BLOCK_SIZE];
        let block = [0_u8; BLOCK_SIZE];
        assert_eq!(volume.write_block(2, &block), Err(Error::OutOfBounds(2)));

        let mut buf = [0_u8; BLOCK_SIZE];
        assert_eq!(volume.read_block(7, &mut buf), Err(Error::OutOfBounds(7)));
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("smartfs_vol_{}.img", rand::random::<u32>()));
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(4 * BLOCK_SIZE as u64).unwrap();

        let mut block = [0_u8; BLOCK_SIZE];
        block[17] = 0x42;
        file.write_block(3, &block).unwrap();
        file.sync().unwrap();

        let mut read = [0_u8; BLOCK_SIZE];
        file.read_block(3, &mut read).unwrap();
        assert_eq!(read[17], 0x42);
        assert_eq!(Volume::block_count(&file), 4);

        drop(file);
        let _ = std::fs::remove_file(&path);
    }
}

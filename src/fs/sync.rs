use std::fmt::{self, Debug};
use std::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::error::Error;
use crate::fs::{FsStat, Metadata, Options, SmartFs};
use crate::path::VersionQuery;
use crate::volume::Volume;

/// A cloneable, serialising handle around the engine. The on-image
/// structures are not internally locked, so every operation takes the one
/// lock for its full duration; hosts hand clones of this to their worker
/// contexts.
pub struct Synced<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Synced<T> {
    pub fn with_inner(inner: T) -> Synced<T> {
        Synced {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn inner(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

impl<T> Clone for Synced<T> {
    fn clone(&self) -> Self {
        Synced {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Volume> Synced<SmartFs<V>> {
    /// Attach an engine to `volume` and wrap it.
    pub fn attach(volume: V, options: Options) -> Result<Synced<SmartFs<V>>, Error> {
        SmartFs::attach(volume, options).map(Synced::with_inner)
    }

    pub fn resolve_path(&self, path: &str) -> Result<u64, Error> {
        self.inner().resolve_path(path)
    }

    pub fn create(&self, path: &str, perm: u32) -> Result<u64, Error> {
        self.inner().create(path, perm)
    }

    pub fn mkdir(&self, path: &str, perm: u32) -> Result<u64, Error> {
        self.inner().mkdir(path, perm)
    }

    pub fn symlink(&self, target: &str, path: &str) -> Result<u64, Error> {
        self.inner().symlink(target, path)
    }

    pub fn read_link(&self, path: &str) -> Result<String, Error> {
        self.inner().read_link(path)
    }

    pub fn link(&self, existing: &str, new_path: &str) -> Result<(), Error> {
        self.inner().link(existing, new_path)
    }

    pub fn unlink(&self, path: &str) -> Result<(), Error> {
        self.inner().unlink(path)
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        self.inner().rename(old_path, new_path)
    }

    pub fn write_path(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize, Error> {
        self.inner().write_path(path, offset, data)
    }

    pub fn read_path(&self, path: &str, offset: u64, out: &mut [u8]) -> Result<usize, Error> {
        self.inner().read_path(path, offset, out)
    }

    pub fn write_file(&self, inode_id: u64, offset: u64, data: &[u8]) -> Result<usize, Error> {
        self.inner().write_file(inode_id, offset, data)
    }

    pub fn read_file(&self, inode_id: u64, offset: u64, out: &mut [u8]) -> Result<usize, Error> {
        self.inner().read_file(inode_id, offset, out)
    }

    pub fn read_file_version(
        &self,
        inode_id: u64,
        query: Option<VersionQuery<'_>>,
        offset: u64,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        self.inner().read_file_version(inode_id, query, offset, out)
    }

    pub fn create_snapshot(&self, inode_id: u64, commit_msg: &str) -> Result<u32, Error> {
        self.inner().create_snapshot(inode_id, commit_msg)
    }

    pub fn toggle_pin(&self, inode_id: u64, version_id: u32) -> Result<bool, Error> {
        self.inner().toggle_pin(inode_id, version_id)
    }

    pub fn list_versions(&self, inode_id: u64, buf: &mut [u8]) -> Result<usize, Error> {
        self.inner().list_versions(inode_id, buf)
    }

    pub fn set_xattr(&self, inode_id: u64, name: &str, value: &str) -> Result<(), Error> {
        self.inner().set_xattr(inode_id, name, value)
    }

    pub fn get_xattr(&self, inode_id: u64, name: &str) -> Result<String, Error> {
        self.inner().get_xattr(inode_id, name)
    }

    pub fn remove_xattr(&self, inode_id: u64, name: &str) -> Result<(), Error> {
        self.inner().remove_xattr(inode_id, name)
    }

    pub fn stat(&self, inode_id: u64) -> Result<Metadata, Error> {
        self.inner().stat(inode_id)
    }

    pub fn statfs(&self) -> FsStat {
        self.inner().statfs()
    }

    pub fn storage_report(&self) -> String {
        self.inner().storage_report()
    }

    pub fn sync(&self) -> Result<(), Error> {
        self.inner().sync()
    }
}

impl<V: Volume> Debug for Synced<SmartFs<V>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Synced<SmartFs>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::test_options;
    use crate::sys::BLOCK_SIZE;

    fn fresh_synced() -> Synced<SmartFs<Vec<u8>>> {
        let mut volume = vec![0_u8; 2048 * BLOCK_SIZE];
        SmartFs::format(&mut volume).unwrap();
        Synced::attach(volume, test_options()).unwrap()
    }

    #[test]
    fn handles_share_one_engine() {
        let fs = fresh_synced();
        let other = fs.clone();

        let id = fs.create("/shared.txt", 0o644).unwrap();
        other.write_file(id, 0, b"through the clone").unwrap();

        let mut out = [0_u8; 17];
        assert_eq!(fs.read_path("/shared.txt", 0, &mut out).unwrap(), 17);
        assert_eq!(&out, b"through the clone");
    }

    #[test]
    fn versioning_through_the_handle() {
        let fs = fresh_synced();
        let id = fs.create("/v.txt", 0o644).unwrap();
        fs.write_file(id, 0, b"state one").unwrap();

        assert_eq!(fs.create_snapshot(id, "checkpoint").unwrap(), 2);
        assert!(fs.toggle_pin(id, 1).unwrap());

        let mut buf = [0_u8; 512];
        let n = fs.list_versions(id, &mut buf).unwrap();
        let listing = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(listing.contains("v1[PIN]"));
        assert!(listing.contains("checkpoint"));
    }
}

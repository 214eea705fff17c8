use std::fmt::{self, Debug};

use crate::error::Error;
use crate::sys::{c_str, set_c_str, Record, MAX_VERSIONS, XATTR_SLOTS};

/// An inode is a fixed-layout record on the disk that represents a file,
/// directory or symbolic link. Inodes do not hold file data; each historical
/// state of the file lives in one [`VersionEntry`] of the inline version
/// ring, and the entry links to the data block that actually contains the
/// bytes. The fixed size lets inodes be placed in an easily indexed array
/// starting at the superblock's `inode_area_start`.
///
/// An inode with `mode == 0` is a free slot. A live inode keeps
/// `1 <= total_versions <= MAX_VERSIONS` and
/// `latest_version == versions[total_versions - 1].version_id`; version ids
/// ascend strictly across the array and are never reused within the inode's
/// lifetime. `link_count` reaching zero frees the inode.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Inode {
    /// Unique inode id; doubles as the slot index in the inode area
    pub inode_id: u64,
    /// Type and permissions (see `TypePerm`); `0` marks the slot free
    pub mode: u32,
    /// Owning user id
    pub uid: u32,
    /// Owning group id
    pub gid: u32,
    /// Version id of the newest entry in `versions`
    pub latest_version: u32,
    /// Number of live entries at the front of `versions`
    pub total_versions: u32,
    /// Count of directory entries referring to this inode. Zero frees the
    /// inode and its slot.
    pub link_count: u32,
    /// The version ring. Only `[0, total_versions)` is meaningful; entries
    /// are kept in ascending `version_id` order, oldest first.
    pub versions: [VersionEntry; MAX_VERSIONS],
    /// Extended attribute slots
    pub xattrs: [XattrEntry; XATTR_SLOTS],
}

unsafe impl Record for Inode {}

/// One snapshot of a file at a point in time, living inline in its inode.
///
/// A newly cut snapshot inherits `file_size`, `block_count` and
/// `block_list_start` from the previous latest entry, so both entries share
/// the same underlying data block until a divergent write lands
/// (copy-on-write over metadata).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VersionEntry {
    /// Monotonically assigned, 1-based; never reused within the inode
    pub version_id: u32,
    /// `1` exempts this entry from rotation when the ring is full
    pub is_pinned: u32,
    /// Creation time, seconds since the epoch
    pub timestamp: i64,
    /// Bytes of file content visible through this version
    pub file_size: u64,
    /// Logical id of this version's sole data block; `0` means "no data"
    pub block_list_start: u64,
    /// Data blocks referenced (0 or 1 in this iteration)
    pub block_count: u32,
    /// NUL-padded commit message, at most 63 bytes of text
    pub commit_msg: [u8; 64],
    #[doc(hidden)]
    pub _pad: [u8; 4],
}

unsafe impl Record for VersionEntry {}

/// One extended attribute slot. A slot is visible iff `valid == 1`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct XattrEntry {
    /// NUL-padded attribute name (e.g. `"user.author"`), at most 31 bytes
    pub name: [u8; 32],
    /// NUL-padded attribute value, at most 31 bytes
    pub value: [u8; 32],
    /// `1` when the slot is in use
    pub valid: u32,
}

unsafe impl Record for XattrEntry {}

bitflags! {
    /// Type and permission bits stored in an inode's `mode`
    pub struct TypePerm: u32 {
        /// Directory
        const DIRECTORY = 0x4000;
        /// Regular file
        const FILE = 0x8000;
        /// Symbolic link
        const SYMLINK = 0xA000;
        /// Other—execute permission
        const O_EXEC = 0o001;
        /// Other—write permission
        const O_WRITE = 0o002;
        /// Other—read permission
        const O_READ = 0o004;
        /// Group—execute permission
        const G_EXEC = 0o010;
        /// Group—write permission
        const G_WRITE = 0o020;
        /// Group—read permission
        const G_READ = 0o040;
        /// User—execute permission
        const U_EXEC = 0o100;
        /// User—write permission
        const U_WRITE = 0o200;
        /// User—read permission
        const U_READ = 0o400;
    }
}

/// Mask isolating the file-type bits of a mode word.
pub const TYPE_MASK: u32 = 0xF000;

impl Default for VersionEntry {
    fn default() -> VersionEntry {
        VersionEntry {
            version_id: 0,
            is_pinned: 0,
            timestamp: 0,
            file_size: 0,
            block_list_start: 0,
            block_count: 0,
            commit_msg: [0; 64],
            _pad: [0; 4],
        }
    }
}

impl VersionEntry {
    pub fn commit_msg(&self) -> &str {
        c_str(&self.commit_msg).unwrap_or("")
    }

    pub fn set_commit_msg(&mut self, msg: &str) {
        set_c_str(&mut self.commit_msg, msg);
    }

    pub fn pinned(&self) -> bool {
        self.is_pinned != 0
    }
}

impl Debug for VersionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionEntry")
            .field("version_id", &self.version_id)
            .field("timestamp", &self.timestamp)
            .field("file_size", &self.file_size)
            .field("block_list_start", &self.block_list_start)
            .field("block_count", &self.block_count)
            .field("is_pinned", &self.pinned())
            .field("commit_msg", &self.commit_msg())
            .finish()
    }
}

impl Default for XattrEntry {
    fn default() -> XattrEntry {
        XattrEntry {
            name: [0; 32],
            value: [0; 32],
            valid: 0,
        }
    }
}

impl XattrEntry {
    pub fn name(&self) -> &str {
        c_str(&self.name).unwrap_or("")
    }

    pub fn value(&self) -> &str {
        c_str(&self.value).unwrap_or("")
    }
}

impl Default for Inode {
    fn default() -> Inode {
        Inode {
            inode_id: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            latest_version: 0,
            total_versions: 0,
            link_count: 0,
            versions: [VersionEntry::default(); MAX_VERSIONS],
            xattrs: [XattrEntry::default(); XATTR_SLOTS],
        }
    }
}

impl Inode {
    /// A fresh live inode with no versions yet. The caller runs
    /// `version::init_inode` before persisting it.
    pub fn new(inode_id: u64, mode: u32, uid: u32, gid: u32) -> Inode {
        Inode {
            inode_id,
            mode,
            uid,
            gid,
            link_count: 1,
            ..Inode::default()
        }
    }

    /// `mode == 0` marks the slot free.
    pub fn is_free(&self) -> bool {
        self.mode == 0
    }

    pub fn is_dir(&self) -> bool {
        self.mode & TYPE_MASK == TypePerm::DIRECTORY.bits()
    }

    pub fn is_file(&self) -> bool {
        self.mode & TYPE_MASK == TypePerm::FILE.bits()
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & TYPE_MASK == TypePerm::SYMLINK.bits()
    }

    /// The live prefix of the version ring, oldest first.
    pub fn live_versions(&self) -> &[VersionEntry] {
        &self.versions[..self.total_versions as usize]
    }

    /// The newest version, if any exists.
    pub fn latest(&self) -> Option<&VersionEntry> {
        self.total_versions
            .checked_sub(1)
            .map(|idx| &self.versions[idx as usize])
    }

    pub fn latest_mut(&mut self) -> Option<&mut VersionEntry> {
        self.total_versions
            .checked_sub(1)
            .map(move |idx| &mut self.versions[idx as usize])
    }

    /// Store an attribute, overwriting a slot of the same name or claiming
    /// the first invalid slot.
    pub fn set_xattr(&mut self, name: &str, value: &str) -> Result<(), Error> {
        if name.len() > 31 || value.len() > 31 {
            return Err(Error::InvalidArgument);
        }
        let slot = self
            .xattrs
            .iter()
            .position(|x| x.valid != 0 && x.name() == name)
            .or_else(|| self.xattrs.iter().position(|x| x.valid == 0))
            .ok_or(Error::NoSpace)?;
        let entry = &mut self.xattrs[slot];
        set_c_str(&mut entry.name, name);
        set_c_str(&mut entry.value, value);
        entry.valid = 1;
        Ok(())
    }

    pub fn get_xattr(&self, name: &str) -> Option<&str> {
        self.xattrs
            .iter()
            .find(|x| x.valid != 0 && x.name() == name)
            .map(|x| x.value())
    }

    pub fn remove_xattr(&mut self, name: &str) -> Result<(), Error> {
        let entry = self
            .xattrs
            .iter_mut()
            .find(|x| x.valid != 0 && x.name() == name)
            .ok_or(Error::NotFound)?;
        *entry = XattrEntry::default();
        Ok(())
    }

    /// Names of all valid attributes, in slot order.
    pub fn xattr_names(&self) -> impl Iterator<Item = &str> {
        self.xattrs
            .iter()
            .filter(|x| x.valid != 0)
            .map(|x| x.name())
    }
}

impl Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("inode_id", &self.inode_id)
            .field("mode", &format_args!("{:#o}", self.mode))
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("link_count", &self.link_count)
            .field("latest_version", &self.latest_version)
            .field("total_versions", &self.total_versions)
            .finish()
    }
}

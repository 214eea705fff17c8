use std::fmt;
use std::io;

/// The set of all possible errors
#[derive(Debug)]
pub enum Error {
    /// Superblock magic did not match on load
    BadMagic(u64),
    /// Block address past the end of the volume
    OutOfBounds(u64),
    /// Path, version or xattr did not resolve
    NotFound,
    /// Inode table, directory block, block allocator, version ring or
    /// xattr slots exhausted
    NoSpace,
    /// Malformed input: bad version suffix, over-long name, xattr against a
    /// version id that never existed
    InvalidArgument,
    /// Payload cannot fit a single data block
    TooBig,
    /// Historical versions are read-only
    ReadOnly,
    /// Operation not implemented by this engine
    NotSupported,
    /// Underlying read/write failure, with the block id when known
    Io {
        block: Option<u64>,
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io_at(block: u64, source: io::Error) -> Error {
        Error::Io {
            block: Some(block),
            source,
        }
    }

    /// Negated errno-style code, suitable for a host shim that speaks the
    /// kernel's calling convention.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::BadMagic(_) => libc::EINVAL,
            Error::OutOfBounds(_) => libc::EIO,
            Error::NotFound => libc::ENOENT,
            Error::NoSpace => libc::ENOSPC,
            Error::InvalidArgument => libc::EINVAL,
            Error::TooBig => libc::EFBIG,
            Error::ReadOnly => libc::EROFS,
            Error::NotSupported => libc::ENOTSUP,
            Error::Io { .. } => libc::EIO,
        };
        -code
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io {
            block: None,
            source: err,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic(magic) => write!(f, "bad magic: {:#x}", magic),
            Error::OutOfBounds(block) => write!(f, "block {} out of bounds", block),
            Error::NotFound => write!(f, "not found"),
            Error::NoSpace => write!(f, "no space"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::TooBig => write!(f, "file too big"),
            Error::ReadOnly => write!(f, "read-only"),
            Error::NotSupported => write!(f, "not supported"),
            Error::Io {
                block: Some(block),
                source,
            } => write!(f, "I/O failure at block {}: {}", block, source),
            Error::Io {
                block: None,
                source,
            } => write!(f, "I/O failure: {}", source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, rhs: &Error) -> bool {
        use Error::*;
        match (self, rhs) {
            (BadMagic(a), BadMagic(b)) => a == b,
            (OutOfBounds(a), OutOfBounds(b)) => a == b,
            (NotFound, NotFound)
            | (NoSpace, NoSpace)
            | (InvalidArgument, InvalidArgument)
            | (TooBig, TooBig)
            | (ReadOnly, ReadOnly)
            | (NotSupported, NotSupported) => true,
            // I/O errors carry no meaningful equality
            _ => false,
        }
    }
}

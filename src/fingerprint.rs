use std::fmt::{self, Debug, Display};

use sha2::{Digest, Sha256};

use crate::sys::HASH_SIZE;

/// SHA-256 digest of a block's content. Two blocks with equal fingerprints
/// are treated as identical by the dedup index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; HASH_SIZE]);

impl Fingerprint {
    /// Fingerprint the given bytes.
    pub fn of(data: &[u8]) -> Fingerprint {
        Fingerprint(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// The canonical 64-character lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(HASH_SIZE * 2);
        for byte in &self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

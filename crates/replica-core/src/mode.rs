//! FileMode: permission bits plus a directory flag in one `u32`.
//!
//! The layout matches the numeric mode field of the persisted state file:
//! the low nine bits are permissions and bit 31 marks a directory.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileMode(u32);

impl FileMode {
    pub const DIR_FLAG: u32 = 1 << 31;
    pub const PERM_MASK: u32 = 0o777;

    /// Unknown or absent. Never a real mode.
    pub const UNKNOWN: FileMode = FileMode(0);

    pub fn file(perm: u32) -> Self {
        Self(perm & Self::PERM_MASK)
    }

    pub fn dir(perm: u32) -> Self {
        Self(Self::DIR_FLAG | (perm & Self::PERM_MASK))
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR_FLAG != 0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }

    pub fn permissions(&self) -> u32 {
        self.0 & Self::PERM_MASK
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir() { 'd' } else { '-' };
        write!(f, "{}{:03o}", kind, self.permissions())
    }
}

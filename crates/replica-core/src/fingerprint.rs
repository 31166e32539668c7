//! Content fingerprints.
//!
//! Regular files are identified by a SHA-256 digest of their content.
//! Directories carry a fixed sentinel instead.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

const DIRECTORY_SENTINEL: &str = "[dir]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a file's full content.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn directory() -> Self {
        Self(DIRECTORY_SENTINEL.to_string())
    }

    pub fn is_directory(&self) -> bool {
        self.0 == DIRECTORY_SENTINEL
    }

    /// Wrap a fingerprint read back from the state file.
    pub fn from_stored(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

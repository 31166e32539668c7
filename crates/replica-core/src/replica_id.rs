//! ReplicaId: Identity of one replica root.
//!
//! Generated once when a root is first synchronized and persisted in its
//! state file. Every version a replica creates is stamped with its id.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

const ID_LEN: usize = 16;
const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplicaIdError {
    #[error("Replica ID is empty")]
    Empty,
    #[error("Replica ID contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Opaque replica identity.
///
/// # Examples
/// ```
/// use replica_core::ReplicaId;
///
/// let id = ReplicaId::generate();
/// assert_eq!(id.as_str().len(), 16);
///
/// let parsed: ReplicaId = "k3j9x0a1b2c3d4e5".parse().unwrap();
/// assert_eq!(parsed.to_string(), "k3j9x0a1b2c3d4e5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Generate a new random replica ID.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let id = (0..ID_LEN)
            .map(|_| ID_CHARS[rng.random_range(0..ID_CHARS.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReplicaId {
    type Err = ReplicaIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ReplicaIdError::Empty);
        }
        // ':' separates owner from version in the state file
        if let Some(c) = s.chars().find(|c| c.is_whitespace() || *c == ':') {
            return Err(ReplicaIdError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

// Serialize as a plain string for consistency in logs, errors, wire frames
impl serde::Serialize for ReplicaId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ReplicaId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

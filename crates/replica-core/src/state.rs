//! Replica state: identity, version vector and per-path file records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Fingerprint, FileMode, ReplicaId, VersionVector};

/// Provenance stamp: which replica's clock, at which tick, produced a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub owner: ReplicaId,
    pub version: u64,
}

impl Stamp {
    pub fn new(owner: ReplicaId, version: u64) -> Self {
        Self { owner, version }
    }
}

/// Record of a path deleted on this replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Stamp the path carried when it was deleted
    pub stamp: Stamp,
    /// Tick of our own clock at which the deletion was observed
    pub deleted_at: u64,
}

impl Tombstone {
    pub fn new(stamp: Stamp, deleted_at: u64) -> Self {
        Self { stamp, deleted_at }
    }
}

/// Tracked state of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub size: u64,
    /// Modification time in nanoseconds since epoch
    pub mtime: i64,
    /// Tick of `owner`'s clock that last wrote this path
    pub version: u64,
    pub owner: ReplicaId,
    pub fingerprint: Fingerprint,
    pub mode: FileMode,
}

impl FileState {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.owner.clone(), self.version)
    }

    pub fn has_stamp(&self, stamp: &Stamp) -> bool {
        self.owner == stamp.owner && self.version == stamp.version
    }

    /// Content comparison used by the comparator.
    ///
    /// A mode difference is always a change. Size or mtime differences only
    /// count when the fingerprints disagree too.
    pub fn content_differs(&self, other: &FileState) -> bool {
        if self.mode != other.mode {
            return true;
        }
        if self.mtime != other.mtime || self.size != other.size {
            return self.fingerprint != other.fingerprint;
        }
        false
    }
}

/// Everything a replica knows about its own root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub replica_id: ReplicaId,
    pub vector: VersionVector,
    pub files: BTreeMap<String, FileState>,
    /// Paths deleted locally. Used to tell a deletion racing a remote edit
    /// apart from a plain deletion.
    pub tombstones: BTreeMap<String, Tombstone>,
}

impl ReplicaState {
    /// Empty state for a new identity, with the vector seeded at `{id: 1}`.
    pub fn new(replica_id: ReplicaId) -> Self {
        let vector = VersionVector::seeded(&replica_id, 1);
        Self {
            replica_id,
            vector,
            files: BTreeMap::new(),
            tombstones: BTreeMap::new(),
        }
    }

    /// Current tick of our own clock.
    pub fn our_version(&self) -> u64 {
        self.vector.get(&self.replica_id)
    }

    pub fn get(&self, path: &str) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.files.get(path).is_some_and(FileState::is_dir)
    }

    /// Paths whose version is ahead of what our own vector records for
    /// their owner. Always empty for a consistent state.
    pub fn invariant_violations(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, state)| !self.vector.dominates(&state.owner, state.version))
            .map(|(path, _)| path.as_str())
            .collect()
    }

    /// Drop tombstones for paths the peer no longer has either.
    ///
    /// Once both sides lack a path the deletion has fully propagated and a
    /// later re-creation must not be mistaken for a race with it.
    pub fn prune_tombstones(&mut self, peer: &ReplicaState) {
        self.tombstones
            .retain(|path, _| peer.files.contains_key(path) && !self.files.contains_key(path));
    }
}

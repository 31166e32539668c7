//! VersionVector: per-replica logical clocks.
//!
//! A replica only ever increments its own entry. Foreign entries are raised
//! exclusively through [`VersionVector::merge`], which takes the pointwise
//! maximum, so no component ever decreases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ReplicaId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<ReplicaId, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector with a single entry, used to seed a fresh replica.
    pub fn seeded(id: &ReplicaId, version: u64) -> Self {
        let mut vector = Self::new();
        vector.0.insert(id.clone(), version);
        vector
    }

    /// Highest version of `id` this vector has observed (0 if never).
    pub fn get(&self, id: &ReplicaId) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    /// Advance our own entry by one and return the new value.
    pub fn increment(&mut self, id: &ReplicaId) -> u64 {
        let entry = self.0.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Raise `id` to at least `version`. Lower values are ignored.
    pub fn observe(&mut self, id: &ReplicaId, version: u64) {
        let entry = self.0.entry(id.clone()).or_insert(0);
        *entry = (*entry).max(version);
    }

    /// True if the version `version` written by `owner` is already known here.
    pub fn dominates(&self, owner: &ReplicaId, version: u64) -> bool {
        self.get(owner) >= version
    }

    /// Pointwise maximum with `other`, in place.
    pub fn merge(&mut self, other: &VersionVector) {
        for (id, version) in &other.0 {
            self.observe(id, *version);
        }
    }

    /// Pointwise maximum of two vectors.
    pub fn merged(a: &VersionVector, b: &VersionVector) -> VersionVector {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, u64)> {
        self.0.iter().map(|(id, v)| (id, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ReplicaId, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (ReplicaId, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

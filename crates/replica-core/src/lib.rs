//! replica-core: version-vector reconciliation for two-replica directory sync.
//!
//! This crate provides:
//! - The replica data model (version vectors, per-path provenance stamps)
//! - Local update against a filesystem scan
//! - The comparator and reconciler that converge two replicas
//! - FileSystem and Replica trait abstractions, with in-process implementations

pub mod codec;
pub mod compare;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod mode;
pub mod orchestrator;
pub mod reconcile;
pub mod replica;
pub mod replica_id;
pub mod scan;
pub mod state;
pub mod store;
pub mod update;
pub mod vector;

pub use compare::{FileTag, TagList, compare};
pub use error::{Result, SyncError};
pub use fingerprint::Fingerprint;
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use mode::FileMode;
pub use orchestrator::{RoundReport, sync_round};
pub use reconcile::{ApplyReport, apply};
pub use replica::{InitOutcome, LocalReplica, Replica};
pub use replica_id::{ReplicaId, ReplicaIdError};
pub use state::{FileState, ReplicaState, Stamp, Tombstone};
pub use update::UpdateReport;
pub use vector::VersionVector;

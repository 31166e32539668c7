//! Local update: fold a fresh scan of the root into the replica state.
//!
//! Every round starts by advancing our own clock. Paths that are new or
//! whose content changed since the last round are stamped with that new
//! version; paths that vanished are dropped and remembered as tombstones.

use tracing::{debug, info};

use crate::error::Result;
use crate::fs::{FileStat, FileSystem};
use crate::scan::{ScanResult, scan};
use crate::state::{FileState, ReplicaState, Tombstone};
use crate::{Fingerprint, ReplicaId};

/// Paths touched by a local update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl UpdateReport {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.removed.is_empty()
    }
}

/// Build the state of a root that has never been synchronized.
///
/// A new identity is generated and every existing path is recorded at
/// version 1 of that identity.
pub async fn fresh_state<F: FileSystem + ?Sized>(fs: &F) -> Result<ReplicaState> {
    let scanned = scan(fs).await?;
    let mut state = ReplicaState::new(ReplicaId::generate());
    let version = state.our_version();

    for (path, stat) in scanned {
        let fingerprint = fingerprint_of(fs, &path, &stat).await?;
        let record = new_record(&stat, fingerprint, state.replica_id.clone(), version);
        state.files.insert(path, record);
    }

    info!(
        "Initialized replica {} with {} path(s)",
        state.replica_id,
        state.files.len()
    );
    Ok(state)
}

/// Scan the root and reconcile `state` against what is on disk.
pub async fn local_update<F: FileSystem + ?Sized>(
    fs: &F,
    state: &mut ReplicaState,
) -> Result<UpdateReport> {
    let scanned = scan(fs).await?;
    update_from_scan(fs, state, scanned).await
}

/// Reconcile `state` against an already collected scan.
pub async fn update_from_scan<F: FileSystem + ?Sized>(
    fs: &F,
    state: &mut ReplicaState,
    scanned: ScanResult,
) -> Result<UpdateReport> {
    let our_id = state.replica_id.clone();
    let our_version = state.vector.increment(&our_id);
    let mut report = UpdateReport::default();

    for (path, stat) in &scanned {
        let Some(record) = state.files.get(path) else {
            debug!("Found new path: {}", path);
            let fingerprint = fingerprint_of(fs, path, stat).await?;
            let record = new_record(stat, fingerprint, our_id.clone(), our_version);
            state.files.insert(path.clone(), record);
            state.tombstones.remove(path);
            report.added.push(path.clone());
            continue;
        };

        // Directories are not content-versioned
        if record.is_dir() && stat.is_dir() {
            continue;
        }

        let mode_changed = record.mode != stat.mode;
        let maybe_changed = stat.mtime > record.mtime || stat.size != record.size;
        if !mode_changed && !maybe_changed {
            continue;
        }

        let fingerprint = fingerprint_of(fs, path, stat).await?;
        let Some(record) = state.files.get_mut(path) else {
            continue;
        };

        if !mode_changed && fingerprint == record.fingerprint {
            // Touched but identical: keep the provenance stamp
            debug!("Metadata-only change: {}", path);
            record.size = stat.size;
            record.mtime = stat.mtime;
            continue;
        }

        debug!("Found updated path: {}", path);
        *record = new_record(stat, fingerprint, our_id.clone(), our_version);
        report.modified.push(path.clone());
    }

    let vanished: Vec<String> = state
        .files
        .keys()
        .filter(|path| !scanned.contains_key(*path))
        .cloned()
        .collect();
    for path in vanished {
        if let Some(record) = state.files.remove(&path) {
            debug!("Path removed locally: {}", path);
            state
                .tombstones
                .insert(path.clone(), Tombstone::new(record.stamp(), our_version));
            report.removed.push(path);
        }
    }

    if report.has_changes() {
        info!(
            "Local update at version {}: {} added, {} modified, {} removed",
            our_version,
            report.added.len(),
            report.modified.len(),
            report.removed.len()
        );
    }
    Ok(report)
}

fn new_record(stat: &FileStat, fingerprint: Fingerprint, owner: ReplicaId, version: u64) -> FileState {
    FileState {
        size: stat.size,
        mtime: stat.mtime,
        version,
        owner,
        fingerprint,
        mode: stat.mode,
    }
}

async fn fingerprint_of<F: FileSystem + ?Sized>(
    fs: &F,
    path: &str,
    stat: &FileStat,
) -> Result<Fingerprint> {
    if stat.is_dir() {
        return Ok(Fingerprint::directory());
    }
    let content = fs.read(path).await?;
    Ok(Fingerprint::of(&content))
}

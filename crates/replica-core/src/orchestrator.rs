//! One synchronization round between two replicas.

use tracing::{error, info, warn};

use crate::compare::compare;
use crate::error::Result;
use crate::reconcile::{ApplyReport, apply};
use crate::replica::{InitOutcome, Replica};
use crate::VersionVector;

/// Outcome of a successful [`sync_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Changes applied to the local side
    pub local: ApplyReport,
    /// Changes applied to the remote side
    pub remote: ApplyReport,
    /// Vector written back to both sides
    pub vector: VersionVector,
}

impl RoundReport {
    /// Conflicting paths, each listed once.
    pub fn conflicts(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .local
            .conflicts
            .iter()
            .chain(&self.remote.conflicts)
            .map(String::as_str)
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    pub fn is_noop(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Run one round: update both sides, compare both ways, apply both
/// directions concurrently, then merge and persist.
///
/// If either direction fails the error is returned once both directions
/// have stopped, and neither state is merged or saved. The next round
/// re-derives everything from the filesystems.
pub async fn sync_round(local: &dyn Replica, remote: &dyn Replica) -> Result<RoundReport> {
    for side in [local, remote] {
        if side.init_root().await? == InitOutcome::Initialized {
            info!("[{}] No previous state, starting fresh", side.label());
        }
    }

    let mut local_state = local.get_state().await?;
    let mut remote_state = remote.get_state().await?;
    // Content sources for each direction; each side's own state is mutated
    let local_snapshot = local_state.clone();
    let remote_snapshot = remote_state.clone();

    let local_tags = compare(&local_state, &remote_state);
    let remote_tags = compare(&remote_state, &local_state);
    info!(
        "Round {} <-> {}: {} action(s) for {}, {} for {}",
        local_state.replica_id,
        remote_state.replica_id,
        local_tags.len(),
        local.label(),
        remote_tags.len(),
        remote.label()
    );

    let local_apply = async {
        let result = apply(&local_tags, &mut local_state, &remote_snapshot, local, remote).await;
        if let Err(e) = &result {
            error!("[{}] Sync failed: {}", local.label(), e);
        }
        result
    };
    let remote_apply = async {
        let result = apply(&remote_tags, &mut remote_state, &local_snapshot, remote, local).await;
        if let Err(e) = &result {
            error!("[{}] Sync failed: {}", remote.label(), e);
        }
        result
    };
    let (local_result, remote_result) = futures::join!(local_apply, remote_apply);
    let local_report = local_result?;
    let remote_report = remote_result?;

    let vector = VersionVector::merged(&local_state.vector, &remote_state.vector);
    local_state.vector = vector.clone();
    remote_state.vector = vector.clone();
    local_state.prune_tombstones(&remote_state);
    remote_state.prune_tombstones(&local_state);

    for (side, state) in [(local, &local_state), (remote, &remote_state)] {
        let ahead = state.invariant_violations();
        if !ahead.is_empty() {
            warn!("[{}] {} path(s) ahead of the merged vector", side.label(), ahead.len());
        }
    }

    local.put_state(&local_state).await?;
    remote.put_state(&remote_state).await?;

    let report = RoundReport {
        local: local_report,
        remote: remote_report,
        vector,
    };
    for path in report.conflicts() {
        warn!("Unresolved conflict: {}", path);
    }
    info!(
        "Round complete: {} change(s) locally, {} remotely, {} conflict(s)",
        report.local.fetched.len() + report.local.created_dirs.len() + report.local.deleted.len(),
        report.remote.fetched.len() + report.remote.created_dirs.len() + report.remote.deleted.len(),
        report.conflicts().len()
    );
    Ok(report)
}

//! Reconciler: replay a [`TagList`] onto one replica.
//!
//! Directories are created shallow to deep before any file is written and
//! removed deep to shallow after every file has been handled, so a parent
//! always exists before its children and is always empty before it goes.
//! Files replacing a directory are handled last.

use tracing::{debug, info, warn};

use crate::compare::{FileTag, TagList};
use crate::error::Result;
use crate::replica::Replica;
use crate::scan::depth;
use crate::state::ReplicaState;
use crate::{FileMode, Fingerprint};

/// What one [`apply`] did to its target.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub fetched: Vec<String>,
    pub created_dirs: Vec<String>,
    pub deleted: Vec<String>,
    pub conflicts: Vec<String>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
            && self.created_dirs.is_empty()
            && self.deleted.is_empty()
            && self.conflicts.is_empty()
    }
}

/// Directory creations, shallow before deep.
pub fn creation_order(tags: &TagList) -> Vec<(&str, FileMode)> {
    let mut dirs: Vec<(&str, FileMode)> = tags
        .dirs
        .iter()
        .filter_map(|(path, tag)| match tag {
            FileTag::Directory(mode) => Some((path.as_str(), *mode)),
            _ => None,
        })
        .collect();
    dirs.sort_by(|(a, _), (b, _)| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
    dirs
}

/// Directory deletions, deep before shallow.
pub fn deletion_order(tags: &TagList) -> Vec<&str> {
    let mut dirs: Vec<&str> = tags
        .dirs
        .iter()
        .filter(|(_, tag)| matches!(tag, FileTag::Deleted))
        .map(|(path, _)| path.as_str())
        .collect();
    dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
    dirs
}

/// Apply `tags` to `target`, fetching content from `source`.
///
/// `target_state` is updated as each action succeeds; the caller persists it.
/// The first failing action aborts the rest of the list. Actions already
/// performed are not rolled back.
pub async fn apply(
    tags: &TagList,
    target_state: &mut ReplicaState,
    source_state: &ReplicaState,
    target: &dyn Replica,
    source: &dyn Replica,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    let label = target.label().to_string();

    // Directory creations
    for (path, mode) in creation_order(tags) {
        if target_state.get(path).is_some_and(|f| !f.is_dir()) {
            debug!("[{}] Removing file in the way of directory {}", label, path);
            target.remove_file(path).await?;
            target_state.files.remove(path);
        }
        target.put_dir(path, mode).await?;
        adopt(target_state, source_state, path, None);
        report.created_dirs.push(path.to_string());
    }

    // Conflicts on directories
    for (path, tag) in &tags.dirs {
        if matches!(tag, FileTag::Conflict) {
            target.report_conflict(path).await?;
            report.conflicts.push(path.clone());
        }
    }

    // Files
    let mut deferred = Vec::new();
    for (path, tag) in &tags.files {
        match *tag {
            FileTag::File(mode) => {
                if target_state.is_dir(path) {
                    deferred.push((path.as_str(), mode));
                    continue;
                }
                fetch(path, mode, target_state, source_state, target, source).await?;
                report.fetched.push(path.clone());
            }
            FileTag::Deleted => {
                target.remove_file(path).await?;
                target_state.files.remove(path);
                report.deleted.push(path.clone());
            }
            FileTag::Conflict => {
                target.report_conflict(path).await?;
                report.conflicts.push(path.clone());
            }
            FileTag::Directory(mode) => {
                target.put_dir(path, mode).await?;
                adopt(target_state, source_state, path, None);
                report.created_dirs.push(path.clone());
            }
        }
    }

    // Directory deletions
    for path in deletion_order(tags) {
        if has_children(target_state, path) {
            // Children the source never saw keep the directory alive
            warn!("[{}] Keeping directory {}: it still has entries", label, path);
            continue;
        }
        target.remove_dir(path).await?;
        target_state.files.remove(path);
        report.deleted.push(path.to_string());
    }

    // Directories turned into files
    for (path, mode) in deferred {
        if has_children(target_state, path) {
            warn!(
                "[{}] Cannot replace directory {} with a file: it still has entries",
                label, path
            );
            target.report_conflict(path).await?;
            report.conflicts.push(path.to_string());
            continue;
        }
        target.remove_dir(path).await?;
        target_state.files.remove(path);
        fetch(path, mode, target_state, source_state, target, source).await?;
        report.fetched.push(path.to_string());
    }

    if !report.is_empty() {
        info!(
            "[{}] Applied: {} fetched, {} dir(s) created, {} deleted, {} conflict(s)",
            label,
            report.fetched.len(),
            report.created_dirs.len(),
            report.deleted.len(),
            report.conflicts.len()
        );
    }
    Ok(report)
}

async fn fetch(
    path: &str,
    mode: FileMode,
    target_state: &mut ReplicaState,
    source_state: &ReplicaState,
    target: &dyn Replica,
    source: &dyn Replica,
) -> Result<()> {
    let content = source.fetch_file(path).await?;
    let fingerprint = Fingerprint::of(&content);
    if source_state
        .get(path)
        .is_some_and(|f| f.fingerprint != fingerprint)
    {
        warn!(
            "{} changed on {} during the round; the next round will pick it up",
            path,
            source.label()
        );
    }

    let stat = target.put_file(path, &content, mode).await?;
    adopt(target_state, source_state, path, Some((stat.size, stat.mtime, fingerprint)));
    Ok(())
}

/// Copy the source's record for `path` into the target, keeping its
/// provenance. File writes substitute what the target observed on disk.
fn adopt(
    target_state: &mut ReplicaState,
    source_state: &ReplicaState,
    path: &str,
    written: Option<(u64, i64, Fingerprint)>,
) {
    let Some(record) = source_state.get(path) else {
        return;
    };
    let mut record = record.clone();
    if let Some((size, mtime, fingerprint)) = written {
        record.size = size;
        record.mtime = mtime;
        record.fingerprint = fingerprint;
    }
    target_state.files.insert(path.to_string(), record);
    target_state.tombstones.remove(path);
}

fn has_children(state: &ReplicaState, dir: &str) -> bool {
    let prefix = format!("{}/", dir);
    state
        .files
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(path, _)| path.starts_with(&prefix))
}

//! Comparator: derive what one replica must do to converge with another.
//!
//! [`compare`] is pure. It is run once per direction; `compare(local, remote)`
//! yields the tags `local` has to apply, with `remote` as content source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::FileMode;
use crate::state::{FileState, ReplicaState, Tombstone};

/// Instruction for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileTag {
    /// Fetch the source's content and write it with this mode
    File(FileMode),
    /// Create a directory with this mode
    Directory(FileMode),
    /// Remove the path
    Deleted,
    /// Concurrent changes; report and leave both sides untouched
    Conflict,
}

/// Tags for one direction, split so directories can be ordered by depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    pub files: BTreeMap<String, FileTag>,
    pub dirs: BTreeMap<String, FileTag>,
}

impl TagList {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    /// Look a path up in either map.
    pub fn get(&self, path: &str) -> Option<FileTag> {
        self.files.get(path).or_else(|| self.dirs.get(path)).copied()
    }

    fn insert(&mut self, path: &str, is_dir: bool, tag: FileTag) {
        let map = if is_dir { &mut self.dirs } else { &mut self.files };
        map.insert(path.to_string(), tag);
    }
}

/// Classify every path known to either side from `local`'s point of view.
pub fn compare(local: &ReplicaState, remote: &ReplicaState) -> TagList {
    let mut tags = TagList::default();

    for (path, state) in &local.files {
        match remote.files.get(path) {
            None => compare_missing_on_remote(path, state, local, remote, &mut tags),
            Some(remote_state) => {
                compare_present(path, state, remote_state, local, remote, &mut tags)
            }
        }
    }

    for (path, remote_state) in &remote.files {
        if local.files.contains_key(path) {
            continue;
        }

        if let Some(tombstone) = local.tombstones.get(path) {
            if races_deletion(tombstone, remote_state, local, remote) {
                debug!("conflict (deleted here, changed there): {}", path);
                tags.insert(path, remote_state.is_dir(), FileTag::Conflict);
                continue;
            }
        }

        if remote_state.version > local.vector.get(&remote_state.owner) {
            if remote_state.is_dir() {
                debug!("new directory: {}", path);
                tags.insert(path, true, FileTag::Directory(remote_state.mode));
            } else {
                debug!("downloading new file: {}", path);
                tags.insert(path, false, FileTag::File(remote_state.mode));
            }
        }
        // Otherwise this is our own deletion; the reverse pass removes it remotely
    }

    tags
}

/// Rule 1: we have the path, the remote does not.
fn compare_missing_on_remote(
    path: &str,
    state: &FileState,
    local: &ReplicaState,
    remote: &ReplicaState,
    tags: &mut TagList,
) {
    if let Some(tombstone) = remote.tombstones.get(path) {
        if races_deletion(tombstone, state, remote, local) {
            debug!("conflict (changed here, deleted there): {}", path);
            tags.insert(path, state.is_dir(), FileTag::Conflict);
            return;
        }
    }

    if remote.vector.dominates(&state.owner, state.version) {
        debug!("deleting: {}", path);
        tags.insert(path, state.is_dir(), FileTag::Deleted);
    }
    // Otherwise the remote never saw it; the reverse pass creates it there
}

/// Whether `survivor`, still present on `surviving`, races the deletion
/// that `deleting` recorded in `tombstone`.
///
/// A survivor still carrying the deleted stamp is a plain deletion. A
/// version stamped after the surviving side learned of the deletion
/// supersedes it and syncs as a new file. Anything else conflicts until
/// one side changes the path again.
fn races_deletion(
    tombstone: &Tombstone,
    survivor: &FileState,
    deleting: &ReplicaState,
    surviving: &ReplicaState,
) -> bool {
    if survivor.has_stamp(&tombstone.stamp) {
        return false;
    }
    let deletion_seen = surviving
        .vector
        .dominates(&deleting.replica_id, tombstone.deleted_at);
    let survivor_seen = deleting.vector.dominates(&survivor.owner, survivor.version);
    !deletion_seen || survivor_seen
}

/// Rule 2/3: both sides have the path.
fn compare_present(
    path: &str,
    state: &FileState,
    remote_state: &FileState,
    local: &ReplicaState,
    remote: &ReplicaState,
    tags: &mut TagList,
) {
    if state.is_dir() && remote_state.is_dir() {
        return;
    }

    if !state.content_differs(remote_state) {
        debug!("unchanged: {}", path);
        return;
    }

    let local_has_remote = local.vector.dominates(&remote_state.owner, remote_state.version);
    let remote_has_local = remote.vector.dominates(&state.owner, state.version);

    match (local_has_remote, remote_has_local) {
        (true, false) => {
            debug!("keeping: {}", path);
        }
        (false, true) => {
            if remote_state.is_dir() {
                debug!("replacing with directory: {}", path);
                tags.insert(path, true, FileTag::Directory(remote_state.mode));
            } else {
                debug!("downloading: {}", path);
                tags.insert(path, false, FileTag::File(remote_state.mode));
            }
        }
        (false, false) => {
            debug!("conflict: {}", path);
            tags.insert(path, state.is_dir(), FileTag::Conflict);
        }
        (true, true) => {
            // Each side has seen the other's version yet they still differ:
            // a conflict from an earlier round that nobody resolved.
            debug!("unresolved conflict: {}", path);
            tags.insert(path, state.is_dir(), FileTag::Conflict);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Stamp;
    use crate::{Fingerprint, ReplicaId, VersionVector};

    fn id(s: &str) -> ReplicaId {
        s.parse().unwrap()
    }

    fn replica(name: &str, vector: &[(&str, u64)]) -> ReplicaState {
        let mut state = ReplicaState::new(id(name));
        state.vector = vector.iter().map(|(r, v)| (id(r), *v)).collect::<VersionVector>();
        state
    }

    fn file(owner: &str, version: u64, content: &[u8]) -> FileState {
        FileState {
            size: content.len() as u64,
            mtime: version as i64 * 100,
            version,
            owner: id(owner),
            fingerprint: Fingerprint::of(content),
            mode: FileMode::file(0o644),
        }
    }

    fn dir(owner: &str, version: u64) -> FileState {
        FileState {
            size: 0,
            mtime: 0,
            version,
            owner: id(owner),
            fingerprint: Fingerprint::directory(),
            mode: FileMode::dir(0o755),
        }
    }

    #[test]
    fn test_new_remote_file_is_fetched() {
        // Scenario A
        let l = replica("l", &[("l", 1), ("r", 0)]);
        let mut r = replica("r", &[("r", 1)]);
        r.files.insert("foo.txt".into(), file("r", 1, b"foo"));

        let tags = compare(&l, &r);
        assert_eq!(tags.files["foo.txt"], FileTag::File(FileMode::file(0o644)));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_concurrent_edits_conflict_both_ways() {
        // Scenario B
        let mut l = replica("l", &[("l", 5), ("r", 3)]);
        let mut r = replica("r", &[("l", 3), ("r", 5)]);
        l.files.insert("bar.txt".into(), file("l", 5, b"left"));
        r.files.insert("bar.txt".into(), file("r", 5, b"right"));

        assert_eq!(compare(&l, &r).files["bar.txt"], FileTag::Conflict);
        assert_eq!(compare(&r, &l).files["bar.txt"], FileTag::Conflict);
    }

    #[test]
    fn test_local_deletion_propagates() {
        // Scenario C: L deleted baz.txt after having seen R's version
        let mut l = replica("l", &[("l", 4), ("r", 2)]);
        let mut r = replica("r", &[("l", 3), ("r", 2)]);
        let baz = file("r", 2, b"baz");
        l.tombstones
            .insert("baz.txt".into(), Tombstone::new(baz.stamp(), 4));
        r.files.insert("baz.txt".into(), baz);

        // Nothing to fetch on L's side
        assert!(compare(&l, &r).is_empty());
        // R is told to delete
        assert_eq!(compare(&r, &l).files["baz.txt"], FileTag::Deleted);
    }

    #[test]
    fn test_deletion_without_tombstone_uses_vector() {
        let l = replica("l", &[("l", 4), ("r", 2)]);
        let mut r = replica("r", &[("l", 3), ("r", 2)]);
        r.files.insert("baz.txt".into(), file("r", 2, b"baz"));

        assert_eq!(compare(&r, &l).files["baz.txt"], FileTag::Deleted);
    }

    #[test]
    fn test_directory_replaces_older_file() {
        // Scenario D
        let mut l = replica("l", &[("l", 6), ("r", 2)]);
        let mut r = replica("r", &[("l", 3), ("r", 4)]);
        l.files.insert("data".into(), dir("l", 6));
        l.files.insert("data/x".into(), file("l", 6, b"x"));
        r.files.insert("data".into(), file("r", 2, b"old"));

        let for_r = compare(&r, &l);
        assert_eq!(for_r.dirs["data"], FileTag::Directory(FileMode::dir(0o755)));
        assert_eq!(for_r.files["data/x"], FileTag::File(FileMode::file(0o644)));

        // L keeps its directory
        assert!(compare(&l, &r).is_empty());
    }

    #[test]
    fn test_file_replaces_older_directory() {
        let mut l = replica("l", &[("l", 3), ("r", 1)]);
        let mut r = replica("r", &[("l", 3), ("r", 5)]);
        l.files.insert("data".into(), dir("l", 2));
        l.files.insert("data/x".into(), file("l", 2, b"x"));
        r.files.insert("data".into(), file("r", 5, b"now a file"));

        let for_l = compare(&l, &r);
        assert_eq!(for_l.files["data"], FileTag::File(FileMode::file(0o644)));
        assert_eq!(for_l.files["data/x"], FileTag::Deleted);
    }

    #[test]
    fn test_dominance_classification() {
        let mut l = replica("l", &[("l", 5), ("r", 4)]);
        let mut r = replica("r", &[("l", 2), ("r", 4)]);
        // L edited at 5 after seeing R's version 4 -> keep on L, download on R
        l.files.insert("f".into(), file("l", 5, b"new"));
        r.files.insert("f".into(), file("r", 4, b"old"));

        assert!(compare(&l, &r).is_empty());
        assert_eq!(compare(&r, &l).files["f"], FileTag::File(FileMode::file(0o644)));
    }

    #[test]
    fn test_metadata_only_difference_is_unchanged() {
        let mut l = replica("l", &[("l", 2), ("r", 2)]);
        let mut r = replica("r", &[("l", 2), ("r", 2)]);
        let mut touched = file("r", 2, b"same");
        touched.mtime += 999;
        l.files.insert("f".into(), file("r", 2, b"same"));
        r.files.insert("f".into(), touched);

        assert!(compare(&l, &r).is_empty());
        assert!(compare(&r, &l).is_empty());
    }

    #[test]
    fn test_unresolved_conflict_persists_after_merge() {
        let merged = [("l", 5), ("r", 5)];
        let mut l = replica("l", &merged);
        let mut r = replica("r", &merged);
        l.files.insert("f".into(), file("l", 5, b"left"));
        r.files.insert("f".into(), file("r", 5, b"right"));

        assert_eq!(compare(&l, &r).files["f"], FileTag::Conflict);
        assert_eq!(compare(&r, &l).files["f"], FileTag::Conflict);
    }

    #[test]
    fn test_delete_racing_edit_is_conflict() {
        // R deleted f while it still carried l:2; L meanwhile edited it at l:6
        let mut l = replica("l", &[("l", 6), ("r", 3)]);
        let mut r = replica("r", &[("l", 2), ("r", 4)]);
        l.files.insert("f".into(), file("l", 6, b"edited"));
        r.tombstones
            .insert("f".into(), Tombstone::new(Stamp::new(id("l"), 2), 4));

        assert_eq!(compare(&l, &r).files["f"], FileTag::Conflict);
        assert_eq!(compare(&r, &l).files["f"], FileTag::Conflict);
    }

    #[test]
    fn test_delete_edit_conflict_persists_after_merge() {
        // Both sides have merged, L's surviving edit is the one already reported
        let merged = [("l", 6), ("r", 4)];
        let mut l = replica("l", &merged);
        let mut r = replica("r", &merged);
        l.files.insert("f".into(), file("l", 6, b"edited"));
        r.tombstones
            .insert("f".into(), Tombstone::new(Stamp::new(id("l"), 2), 4));

        assert_eq!(compare(&l, &r).files["f"], FileTag::Conflict);
        assert_eq!(compare(&r, &l).files["f"], FileTag::Conflict);
    }

    #[test]
    fn test_edit_after_seen_deletion_supersedes_it() {
        // L edited f again at l:7, after the merge that told it about R's deletion
        let mut l = replica("l", &[("l", 7), ("r", 4)]);
        let mut r = replica("r", &[("l", 6), ("r", 4)]);
        l.files.insert("f".into(), file("l", 7, b"edited again"));
        r.tombstones
            .insert("f".into(), Tombstone::new(Stamp::new(id("l"), 2), 4));

        assert!(compare(&l, &r).is_empty());
        assert_eq!(compare(&r, &l).files["f"], FileTag::File(FileMode::file(0o644)));
    }

    #[test]
    fn test_recreation_after_propagated_delete_is_fetched() {
        // No tombstone left on L once both sides dropped the path
        let l = replica("l", &[("l", 4), ("r", 3)]);
        let mut r = replica("r", &[("l", 4), ("r", 7)]);
        r.files.insert("f".into(), file("r", 7, b"reborn"));

        assert_eq!(compare(&l, &r).files["f"], FileTag::File(FileMode::file(0o644)));
    }

    #[test]
    fn test_identical_directories_produce_no_tags() {
        let mut l = replica("l", &[("l", 2), ("r", 2)]);
        let mut r = replica("r", &[("l", 2), ("r", 2)]);
        l.files.insert("d".into(), dir("l", 1));
        r.files.insert("d".into(), dir("r", 2));

        assert!(compare(&l, &r).is_empty());
        assert!(compare(&r, &l).is_empty());
    }

    #[test]
    fn test_stale_directory_deleted_into_dirs_map() {
        let mut l = replica("l", &[("l", 3), ("r", 3)]);
        let r = replica("r", &[("l", 3), ("r", 3)]);
        l.files.insert("old".into(), dir("l", 2));

        let tags = compare(&l, &r);
        assert_eq!(tags.dirs["old"], FileTag::Deleted);
        assert!(tags.files.is_empty());
    }
}

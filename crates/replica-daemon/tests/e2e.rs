//! End-to-end tests: a real server on localhost, a real client, real directories.

use std::path::Path;
use std::time::Duration;

use replica_core::{LocalReplica, Replica, RoundReport, SyncError, sync_round};
use replica_daemon::{CHUNK_SIZE, NativeFs, ReconnectConfig, RemoteReplica, ReplicaServer};

async fn start_server() -> String {
    let server = ReplicaServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    format!("ws://{}", addr)
}

fn config() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_attempts: Some(3),
        ..Default::default()
    }
}

async fn round(url: &str, local: &Path, remote: &Path) -> Result<RoundReport, SyncError> {
    let remote_replica = RemoteReplica::connect(url, remote.to_string_lossy(), &config())
        .await
        .unwrap();
    let local_replica = LocalReplica::new("local", NativeFs::new(local.to_path_buf()));
    let result = sync_round(&local_replica, &remote_replica).await;
    remote_replica.shutdown().await.unwrap();
    result
}

fn write(root: &Path, path: &str, content: &[u8]) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn read(root: &Path, path: &str) -> Vec<u8> {
    std::fs::read(root.join(path)).unwrap()
}

#[tokio::test]
async fn test_first_round_copies_both_ways() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(local.path(), "notes/today.md", b"local notes");
    write(remote.path(), "photos/cat.jpg", b"\xff\xd8 binary");

    let report = round(&url, local.path(), remote.path()).await.unwrap();

    assert_eq!(report.local.fetched, vec!["photos/cat.jpg"]);
    assert_eq!(report.remote.fetched, vec!["notes/today.md"]);
    assert_eq!(read(local.path(), "photos/cat.jpg"), b"\xff\xd8 binary");
    assert_eq!(read(remote.path(), "notes/today.md"), b"local notes");
    assert!(local.path().join(".sync/state.db").exists());
    assert!(remote.path().join(".sync/state.db").exists());
}

#[tokio::test]
async fn test_second_round_is_noop() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(local.path(), "a.txt", b"a");
    write(remote.path(), "dir/b.txt", b"b");

    round(&url, local.path(), remote.path()).await.unwrap();
    let report = round(&url, local.path(), remote.path()).await.unwrap();
    assert!(report.is_noop(), "unexpected actions: {report:?}");
}

#[tokio::test]
async fn test_edits_and_deletions_propagate() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(local.path(), "keep.txt", b"v1");
    write(local.path(), "gone/old.txt", b"old");
    round(&url, local.path(), remote.path()).await.unwrap();

    // Make sure the edit lands on a later mtime than the synced copy
    tokio::time::sleep(Duration::from_millis(20)).await;
    write(remote.path(), "keep.txt", b"v2 edited remotely");
    std::fs::remove_dir_all(local.path().join("gone")).unwrap();

    let report = round(&url, local.path(), remote.path()).await.unwrap();
    assert_eq!(report.local.fetched, vec!["keep.txt"]);
    assert_eq!(report.remote.deleted, vec!["gone/old.txt", "gone"]);
    assert_eq!(read(local.path(), "keep.txt"), b"v2 edited remotely");
    assert!(!remote.path().join("gone").exists());
}

#[tokio::test]
async fn test_conflict_is_reported_not_resolved() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(local.path(), "bar.txt", b"base");
    round(&url, local.path(), remote.path()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    write(local.path(), "bar.txt", b"left");
    write(remote.path(), "bar.txt", b"right");

    let report = round(&url, local.path(), remote.path()).await.unwrap();
    assert_eq!(report.conflicts(), vec!["bar.txt"]);
    assert_eq!(read(local.path(), "bar.txt"), b"left");
    assert_eq!(read(remote.path(), "bar.txt"), b"right");
}

#[tokio::test]
async fn test_files_larger_than_a_chunk_transfer_both_ways() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let up: Vec<u8> = (0..2 * CHUNK_SIZE + 123).map(|i| (i % 251) as u8).collect();
    let down: Vec<u8> = (0..CHUNK_SIZE + 1).map(|i| (i % 13) as u8).collect();
    write(local.path(), "video/up.bin", &up);
    write(remote.path(), "video/down.bin", &down);

    let report = round(&url, local.path(), remote.path()).await.unwrap();
    assert_eq!(report.remote.fetched, vec!["video/up.bin"]);
    assert_eq!(report.local.fetched, vec!["video/down.bin"]);
    assert_eq!(read(remote.path(), "video/up.bin"), up);
    assert_eq!(read(local.path(), "video/down.bin"), down);
}

#[tokio::test]
async fn test_names_with_spaces_sync() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(local.path(), "My Notes/100% done.md", b"list");

    round(&url, local.path(), remote.path()).await.unwrap();
    assert_eq!(read(remote.path(), "My Notes/100% done.md"), b"list");
    let report = round(&url, local.path(), remote.path()).await.unwrap();
    assert!(report.is_noop(), "unexpected actions: {report:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_permissions_are_carried() {
    use std::os::unix::fs::PermissionsExt;

    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    write(remote.path(), "run.sh", b"#!/bin/sh\n");
    std::fs::set_permissions(
        remote.path().join("run.sh"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();

    round(&url, local.path(), remote.path()).await.unwrap();
    let mode = std::fs::metadata(local.path().join("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn test_one_server_serves_two_roots_at_once() {
    let url = start_server().await;
    let (l1, r1) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (l2, r2) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    write(r1.path(), "one.txt", b"1");
    write(r2.path(), "two.txt", b"2");

    let (a, b) = tokio::join!(
        round(&url, l1.path(), r1.path()),
        round(&url, l2.path(), r2.path())
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(read(l1.path(), "one.txt"), b"1");
    assert_eq!(read(l2.path(), "two.txt"), b"2");
    assert!(!l1.path().join("two.txt").exists());
}

#[tokio::test]
async fn test_missing_remote_root_fails_the_round() {
    let url = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let missing = remote.path().join("does-not-exist");

    let err = round(&url, local.path(), &missing).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
    // Nothing persisted locally
    assert!(!local.path().join(".sync/state.db").exists());
}

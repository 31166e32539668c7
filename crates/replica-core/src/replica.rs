//! Replica endpoint: the procedures a sync round invokes on either side.
//!
//! Implementations:
//! - [`LocalReplica`]: in-process, over any [`FileSystem`]
//! - `RemoteReplica` (replica-daemon): the same procedures over a WebSocket

use async_trait::async_trait;
use futures::lock::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::fs::{FileStat, FileSystem};
use crate::state::ReplicaState;
use crate::store::{self, Loaded, SYNC_DIR};
use crate::update::local_update;
use crate::FileMode;

/// Result of [`Replica::init_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InitOutcome {
    /// Persisted state existed and was advanced by a local update
    Loaded,
    /// No persisted state; a fresh one was built from a full scan
    Initialized,
}

/// One side of a sync round.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Short label used in log lines ("local", "remote", ...)
    fn label(&self) -> &str;

    /// Load (or create) the state of the root and fold in local changes
    async fn init_root(&self) -> Result<InitOutcome>;

    /// Current in-memory state
    async fn get_state(&self) -> Result<ReplicaState>;

    /// Replace and persist the state
    async fn put_state(&self, state: &ReplicaState) -> Result<()>;

    /// Write a file, returning its metadata after the write
    async fn put_file(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat>;

    /// Create a directory (idempotent)
    async fn put_dir(&self, path: &str, mode: FileMode) -> Result<()>;

    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove an empty directory
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Surface a conflict on this side; nothing is changed
    async fn report_conflict(&self, path: &str) -> Result<()>;

    /// Full content of a file, for the other side to copy
    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>>;

    /// End the session
    async fn shutdown(&self) -> Result<()>;
}

/// Reject paths that could escape the root or touch the sync directory.
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = || SyncError::InvalidPath(path.to_string());

    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(invalid());
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }
    if path.split('/').next() == Some(SYNC_DIR) {
        return Err(invalid());
    }
    Ok(())
}

/// Replica over a filesystem in this process.
///
/// Owns the state of exactly one root. A process serving several roots
/// holds one `LocalReplica` per root.
pub struct LocalReplica<F: FileSystem> {
    label: String,
    fs: F,
    state: Mutex<Option<ReplicaState>>,
}

impl<F: FileSystem> LocalReplica<F> {
    pub fn new(label: impl Into<String>, fs: F) -> Self {
        Self {
            label: label.into(),
            fs,
            state: Mutex::new(None),
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    async fn current_state(&self) -> Result<ReplicaState> {
        self.state.lock().await.clone().ok_or(SyncError::NotInitialized)
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.lock().await.is_none() {
            return Err(SyncError::NotInitialized);
        }
        Ok(())
    }
}

#[async_trait]
impl<F: FileSystem> Replica for LocalReplica<F> {
    fn label(&self) -> &str {
        &self.label
    }

    async fn init_root(&self) -> Result<InitOutcome> {
        let (state, outcome) = match store::load(&self.fs).await? {
            Loaded::Existing(mut state) => {
                local_update(&self.fs, &mut state).await?;
                (state, InitOutcome::Loaded)
            }
            Loaded::Initialized(state) => (state, InitOutcome::Initialized),
        };

        info!(
            "[{}] Replica {} ready at version {}",
            self.label,
            state.replica_id,
            state.our_version()
        );
        *self.state.lock().await = Some(state);
        Ok(outcome)
    }

    async fn get_state(&self) -> Result<ReplicaState> {
        self.current_state().await
    }

    async fn put_state(&self, state: &ReplicaState) -> Result<()> {
        store::save(&self.fs, state).await?;
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }

    async fn put_file(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat> {
        self.ensure_initialized().await?;
        validate_path(path)?;
        debug!("[{}] Writing {} ({} bytes)", self.label, path, content.len());
        Ok(self.fs.write(path, content, mode).await?)
    }

    async fn put_dir(&self, path: &str, mode: FileMode) -> Result<()> {
        self.ensure_initialized().await?;
        validate_path(path)?;
        debug!("[{}] Creating directory {}", self.label, path);
        Ok(self.fs.mkdir(path, mode).await?)
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.ensure_initialized().await?;
        validate_path(path)?;
        debug!("[{}] Removing {}", self.label, path);
        Ok(self.fs.remove_file(path).await?)
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.ensure_initialized().await?;
        validate_path(path)?;
        debug!("[{}] Removing directory {}", self.label, path);
        Ok(self.fs.remove_dir(path).await?)
    }

    async fn report_conflict(&self, path: &str) -> Result<()> {
        warn!("[{}] CONFLICT: {}", self.label, path);
        Ok(())
    }

    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_initialized().await?;
        validate_path(path)?;
        Ok(self.fs.read(path).await?)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("[{}] Shutting down", self.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::store::STATE_FILE;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("a.txt").is_ok());
        assert!(validate_path("dir/a.txt").is_ok());
        assert!(validate_path(".syncthing").is_ok());

        for bad in ["", "/etc/passwd", "../x", "a/../b", "a//b", "./a", ".sync", ".sync/state.db"] {
            assert!(validate_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let replica = LocalReplica::new("local", InMemoryFs::new());
        assert!(matches!(
            replica.get_state().await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            replica.put_dir("d", FileMode::dir(0o755)).await,
            Err(SyncError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_fresh_then_loaded() {
        let fs = InMemoryFs::new();
        fs.write("a.txt", b"a", FileMode::file(0o644)).await.unwrap();
        let replica = LocalReplica::new("local", fs);

        assert_eq!(replica.init_root().await.unwrap(), InitOutcome::Initialized);
        let state = replica.get_state().await.unwrap();
        assert_eq!(state.our_version(), 1);
        replica.put_state(&state).await.unwrap();
        assert!(replica.fs().exists(STATE_FILE).await.unwrap());

        // Second session on the same root: loaded and advanced
        let again = LocalReplica::new("local", replica.fs);
        assert_eq!(again.init_root().await.unwrap(), InitOutcome::Loaded);
        let state2 = again.get_state().await.unwrap();
        assert_eq!(state2.replica_id, state.replica_id);
        assert_eq!(state2.our_version(), 2);
    }

    #[tokio::test]
    async fn test_writes_cannot_touch_sync_dir() {
        let replica = LocalReplica::new("local", InMemoryFs::new());
        replica.init_root().await.unwrap();
        let err = replica
            .put_file(STATE_FILE, b"replica evil", FileMode::file(0o644))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_put_file_returns_stat() {
        let replica = LocalReplica::new("local", InMemoryFs::new());
        replica.init_root().await.unwrap();
        let stat = replica
            .put_file("d/f.txt", b"hello", FileMode::file(0o600))
            .await
            .unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.mode, FileMode::file(0o600));
        assert_eq!(replica.fetch_file("d/f.txt").await.unwrap(), b"hello");
    }
}

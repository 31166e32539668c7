//! FileSystem trait abstraction for replica roots.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in replica-daemon) - Uses tokio::fs
//!
//! All paths are relative to the replica root and use `/` as separator.
//! The empty string names the root itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

use crate::mode::FileMode;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
}

impl FsError {
    /// Path the failed operation was acting on.
    pub fn path(&self) -> &str {
        match self {
            FsError::NotFound(p)
            | FsError::AlreadyExists(p)
            | FsError::NotEmpty(p)
            | FsError::IsDirectory(p)
            | FsError::NotDirectory(p) => p,
            FsError::Io { path, .. } => path,
        }
    }

    pub fn io(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        FsError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Modification time in nanoseconds since epoch
    pub mtime: i64,
    /// Permission bits plus the directory flag
    pub mode: FileMode,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents with the given permission bits (creates parent
    /// directories if needed). Returns the metadata observed after the write.
    async fn write(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete a regular file
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Delete an empty directory
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create a directory with the given permission bits. Already existing is not an error.
    async fn mkdir(&self, path: &str, mode: FileMode) -> Result<()>;

    /// Rename `from` to `to`, replacing `to` if it exists
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct MemFile {
    content: Vec<u8>,
    mtime: i64,
    perm: u32,
}

/// In-memory filesystem for testing.
///
/// Modification times come from a logical clock that ticks on every write,
/// so tests never depend on wall-clock resolution.
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, MemFile>>,
    /// Directory path -> permission bits
    dirs: RwLock<BTreeMap<String, u32>>,
    clock: AtomicI64,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(String::new(), 0o755); // Root directory
        Self {
            files: RwLock::new(BTreeMap::new()),
            dirs: RwLock::new(dirs),
            clock: AtomicI64::new(1_000),
        }
    }

    /// Force a specific mtime, e.g. to simulate a touch that keeps content.
    pub fn set_mtime(&self, path: &str, mtime: i64) {
        let path = Self::normalize_path(path);
        if let Some(file) = self.files.write().unwrap().get_mut(&path) {
            file.mtime = mtime;
        }
    }

    /// Change permission bits without touching content or mtime.
    pub fn chmod(&self, path: &str, perm: u32) {
        let path = Self::normalize_path(path);
        if let Some(file) = self.files.write().unwrap().get_mut(&path) {
            file.perm = perm & FileMode::PERM_MASK;
            return;
        }
        if let Some(dir) = self.dirs.write().unwrap().get_mut(&path) {
            *dir = perm & FileMode::PERM_MASK;
        }
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }

    fn create_dirs(&self, path: &str, perm: u32) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        if let Some(parent) = Self::parent_path(path) {
            self.create_dirs(&parent, 0o755)?;
        }
        if self.files.read().unwrap().contains_key(path) {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        self.dirs
            .write()
            .unwrap()
            .entry(path.to_string())
            .or_insert(perm & FileMode::PERM_MASK);
        Ok(())
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        let files = self.files.read().unwrap();
        let dirs = self.dirs.read().unwrap();
        files.keys().any(|p| p.starts_with(&prefix)) || dirs.keys().any(|p| p.starts_with(&prefix))
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        if self.dirs.read().unwrap().contains_key(&path) {
            return Err(FsError::IsDirectory(path));
        }
        let files = self.files.read().unwrap();
        files
            .get(&path)
            .map(|f| f.content.clone())
            .ok_or(FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat> {
        let path = Self::normalize_path(path);
        if self.dirs.read().unwrap().contains_key(&path) {
            return Err(FsError::IsDirectory(path));
        }

        // Create parent directories
        if let Some(parent) = Self::parent_path(&path) {
            self.create_dirs(&parent, 0o755)?;
        }

        let file = MemFile {
            content: content.to_vec(),
            mtime: self.tick(),
            perm: mode.permissions(),
        };
        let stat = FileStat {
            size: file.content.len() as u64,
            mtime: file.mtime,
            mode: FileMode::file(file.perm),
        };
        self.files.write().unwrap().insert(path, file);
        Ok(stat)
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        if !self.dirs.read().unwrap().contains_key(&path) {
            if self.files.read().unwrap().contains_key(&path) {
                return Err(FsError::NotDirectory(path));
            }
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();

        let files = self.files.read().unwrap();
        for file_path in files.keys() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    });
                }
            }
        }

        let dirs = self.dirs.read().unwrap();
        for dir_path in dirs.keys() {
            if let Some(rest) = dir_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: true,
                    });
                }
            }
        }

        Ok(entries)
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.dirs.read().unwrap().contains_key(&path) {
            return Err(FsError::IsDirectory(path));
        }
        match self.files.write().unwrap().remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.files.read().unwrap().contains_key(&path) {
            return Err(FsError::NotDirectory(path));
        }
        if !self.dirs.read().unwrap().contains_key(&path) {
            return Err(FsError::NotFound(path));
        }
        if self.has_children(&path) {
            return Err(FsError::NotEmpty(path));
        }
        self.dirs.write().unwrap().remove(&path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let dirs = self.dirs.read().unwrap();
        Ok(files.contains_key(&path) || dirs.contains_key(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);

        if let Some(file) = self.files.read().unwrap().get(&path) {
            return Ok(FileStat {
                size: file.content.len() as u64,
                mtime: file.mtime,
                mode: FileMode::file(file.perm),
            });
        }

        if let Some(perm) = self.dirs.read().unwrap().get(&path) {
            return Ok(FileStat {
                size: 0,
                mtime: 0,
                mode: FileMode::dir(*perm),
            });
        }

        Err(FsError::NotFound(path))
    }

    async fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        let path = Self::normalize_path(path);
        self.create_dirs(&path, mode.permissions())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = Self::normalize_path(from);
        let to = Self::normalize_path(to);
        let mut files = self.files.write().unwrap();
        let file = files.remove(&from).ok_or_else(|| FsError::NotFound(from.clone()))?;
        files.insert(to, file);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows sharing a filesystem between a replica handle and test assertions
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat> {
        (**self).write(path, content, mode).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        (**self).remove_file(path).await
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        (**self).remove_dir(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        (**self).mkdir(path, mode).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        let stat = fs.write("test.txt", b"hello world", FileMode::file(0o644)).await.unwrap();
        assert_eq!(stat.size, 11);
        assert_eq!(stat.mode.permissions(), 0o644);

        let content = fs.read("test.txt").await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(fs.exists("test.txt").await.unwrap());
        assert!(!fs.exists("nonexistent.txt").await.unwrap());

        fs.remove_file("test.txt").await.unwrap();
        assert!(!fs.exists("test.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_fs_directories() {
        let fs = InMemoryFs::new();

        // Write creates parent directories
        fs.write("a/b/c.txt", b"content", FileMode::file(0o644)).await.unwrap();

        assert!(fs.stat("a").await.unwrap().is_dir());
        assert!(fs.stat("a/b").await.unwrap().is_dir());

        let entries = fs.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
        assert!(entries[0].is_dir);

        let entries = fs.list("a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c.txt");
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_remove_dir_requires_empty() {
        let fs = InMemoryFs::new();
        fs.write("d/f", b"x", FileMode::file(0o644)).await.unwrap();

        assert!(matches!(fs.remove_dir("d").await, Err(FsError::NotEmpty(_))));
        fs.remove_file("d/f").await.unwrap();
        fs.remove_dir("d").await.unwrap();
        assert!(!fs.exists("d").await.unwrap());
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let fs = InMemoryFs::new();
        fs.mkdir("d", FileMode::dir(0o700)).await.unwrap();
        fs.mkdir("d", FileMode::dir(0o755)).await.unwrap();
        assert_eq!(fs.stat("d").await.unwrap().mode, FileMode::dir(0o700));
    }

    #[tokio::test]
    async fn test_writes_advance_mtime() {
        let fs = InMemoryFs::new();
        let first = fs.write("f", b"1", FileMode::file(0o644)).await.unwrap();
        let second = fs.write("f", b"2", FileMode::file(0o644)).await.unwrap();
        assert!(second.mtime > first.mtime);
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let fs = InMemoryFs::new();
        fs.write("a", b"new", FileMode::file(0o644)).await.unwrap();
        fs.write("b", b"old", FileMode::file(0o644)).await.unwrap();
        fs.rename("a", "b").await.unwrap();
        assert!(!fs.exists("a").await.unwrap());
        assert_eq!(fs.read("b").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_errors_carry_path() {
        let fs = InMemoryFs::new();
        let err = fs.read("missing/file").await.unwrap_err();
        assert_eq!(err.path(), "missing/file");
    }
}

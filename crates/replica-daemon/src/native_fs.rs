//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use replica_core::FileMode;
use replica_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, warn};

/// Filesystem rooted at one replica directory
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

pub(crate) fn map_err(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(path.to_string()),
        ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
        ErrorKind::NotADirectory => FsError::NotDirectory(path.to_string()),
        _ => FsError::io(path, e),
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & FileMode::PERM_MASK
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(unix)]
async fn set_permission_bits(full_path: &std::path::Path, perm: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(full_path, std::fs::Permissions::from_mode(perm)).await
}

#[cfg(not(unix))]
async fn set_permission_bits(_full_path: &std::path::Path, _perm: u32) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn write(&self, path: &str, content: &[u8], mode: FileMode) -> Result<FileStat> {
        let full_path = self.full_path(path);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(path, e))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| map_err(path, e))?;
        set_permission_bits(&full_path, mode.permissions())
            .await
            .map_err(|e| map_err(path, e))?;

        self.stat(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_err(path, e))? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().map(str::to_string) else {
                warn!("Skipping non-UTF-8 name in {:?}: {:?}", path, file_name);
                continue;
            };
            let file_type = entry.file_type().await.map_err(|e| map_err(path, e))?;

            if file_type.is_symlink() {
                debug!("Skipping symlink {}/{}", path, name);
                continue;
            }

            entries.push(FileEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        fs::remove_file(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        fs::remove_dir(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))?;

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let perm = permission_bits(&metadata);
        let (size, mode) = if metadata.is_dir() {
            (0, FileMode::dir(perm))
        } else {
            (metadata.len(), FileMode::file(perm))
        };

        Ok(FileStat { size, mtime, mode })
    }

    async fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        let full_path = self.full_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| map_err(path, e))?;
        set_permission_bits(&full_path, mode.permissions())
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.full_path(from), self.full_path(to))
            .await
            .map_err(|e| map_err(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, NativeFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        (dir, fs)
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_sets_mode() {
        let (_dir, fs) = setup();
        let stat = fs
            .write("a/b/c.txt", b"hello", FileMode::file(0o600))
            .await
            .unwrap();

        assert_eq!(stat.size, 5);
        assert!(stat.mtime > 0);
        #[cfg(unix)]
        assert_eq!(stat.mode, FileMode::file(0o600));
        assert!(fs.stat("a/b").await.unwrap().is_dir());
        assert_eq!(fs.read("a/b/c.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let (_dir, fs) = setup();
        fs.write("x", b"1", FileMode::file(0o644)).await.unwrap();
        fs.mkdir("d", FileMode::dir(0o755)).await.unwrap();

        let mut names: Vec<String> = fs.list("").await.unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["d", "x"]);

        fs.remove_file("x").await.unwrap();
        fs.remove_dir("d").await.unwrap();
        assert!(!fs.exists("x").await.unwrap());
        assert!(!fs.exists("d").await.unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (dir, fs) = setup();
        std::fs::write(dir.path().join("good.txt"), b"ok").unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"??").unwrap();

        let names: Vec<String> = fs.list("").await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["good.txt"]);

        let scanned = replica_core::scan::scan(&fs).await.unwrap();
        assert_eq!(scanned.keys().collect::<Vec<_>>(), vec!["good.txt"]);
    }

    #[tokio::test]
    async fn test_errors_map_to_kinds() {
        let (_dir, fs) = setup();
        assert!(matches!(fs.read("missing").await, Err(FsError::NotFound(p)) if p == "missing"));

        fs.write("d/f", b"x", FileMode::file(0o644)).await.unwrap();
        assert!(matches!(fs.remove_dir("d").await, Err(FsError::NotEmpty(_))));
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let (_dir, fs) = setup();
        fs.mkdir("d", FileMode::dir(0o755)).await.unwrap();
        fs.mkdir("d", FileMode::dir(0o755)).await.unwrap();
        assert!(fs.stat("d").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_rename_replaces() {
        let (_dir, fs) = setup();
        fs.write("a", b"new", FileMode::file(0o644)).await.unwrap();
        fs.write("b", b"old", FileMode::file(0o644)).await.unwrap();
        fs.rename("a", "b").await.unwrap();
        assert_eq!(fs.read("b").await.unwrap(), b"new");
        assert!(!fs.exists("a").await.unwrap());
    }
}

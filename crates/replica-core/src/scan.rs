//! Filesystem scanner: flattens a replica root into path -> metadata.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use tracing::debug;

use crate::fs::{FileStat, FileSystem, Result};
use crate::store::SYNC_DIR;

/// Result of a full scan, keyed by root-relative path.
pub type ScanResult = BTreeMap<String, FileStat>;

/// Recursively list every file and directory under the root.
///
/// The sync directory holding the persisted state is never entered. The
/// first directory that cannot be read aborts the scan; no partial result
/// is returned.
pub async fn scan<F: FileSystem + ?Sized>(fs: &F) -> Result<ScanResult> {
    let mut out = BTreeMap::new();
    scan_dir(fs, "", &mut out).await?;
    debug!("Scanned {} path(s)", out.len());
    Ok(out)
}

fn scan_dir<'a, F: FileSystem + ?Sized>(
    fs: &'a F,
    dir: &'a str,
    out: &'a mut ScanResult,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let mut entries = fs.list(dir).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in entries {
            if dir.is_empty() && entry.name == SYNC_DIR {
                continue;
            }
            let path = join(dir, &entry.name);
            let stat = fs.stat(&path).await?;
            out.insert(path.clone(), stat);

            if stat.is_dir() {
                scan_dir(fs, &path, out).await?;
            }
        }

        Ok(())
    })
}

/// Join a directory and a child name into a root-relative path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Directory depth of a root-relative path (number of separators).
pub fn depth(path: &str) -> usize {
    path.matches('/').count()
}

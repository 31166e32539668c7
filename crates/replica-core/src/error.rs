//! Error type shared by the reconciliation engine.

use thiserror::Error;

use crate::codec::ParseError;
use crate::fs::FsError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Corrupt state file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("Replica not initialized")]
    NotInitialized,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote replica error: {0}")]
    Remote(String),
}

impl SyncError {
    /// Path involved in the failure, when there is one.
    pub fn path(&self) -> Option<&str> {
        match self {
            SyncError::Fs(e) => Some(e.path()),
            SyncError::Parse { path, .. } | SyncError::InvalidPath(path) => Some(path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

//! Persistence of the replica state inside the root it describes.
//!
//! The state lives in `.sync/state.db`. Saves go to a temporary file first
//! and are renamed into place, so an interrupted save never leaves a torn
//! state file behind.

use tracing::{debug, info};

use crate::codec::{self, ParseError};
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::state::ReplicaState;
use crate::update::fresh_state;
use crate::FileMode;

/// Directory for sync state, excluded from scans
pub const SYNC_DIR: &str = ".sync";
/// Persisted replica state
pub const STATE_FILE: &str = ".sync/state.db";
const STATE_TMP_FILE: &str = ".sync/state.db.tmp";

/// Outcome of [`load`].
#[derive(Debug)]
pub enum Loaded {
    /// A persisted state was found and parsed.
    Existing(ReplicaState),
    /// Nothing was persisted yet; a fresh state was built from a full scan.
    Initialized(ReplicaState),
}

impl Loaded {
    pub fn is_initialized(&self) -> bool {
        matches!(self, Loaded::Initialized(_))
    }

    pub fn into_state(self) -> ReplicaState {
        match self {
            Loaded::Existing(state) | Loaded::Initialized(state) => state,
        }
    }
}

/// Load the persisted state of the root behind `fs`.
pub async fn load<F: FileSystem + ?Sized>(fs: &F) -> Result<Loaded> {
    if !fs.exists(STATE_FILE).await? {
        info!("No state file found, initializing new replica");
        return Ok(Loaded::Initialized(fresh_state(fs).await?));
    }

    let bytes = fs.read(STATE_FILE).await?;
    let text = String::from_utf8(bytes).map_err(|_| SyncError::Parse {
        path: STATE_FILE.to_string(),
        source: ParseError::InvalidUtf8,
    })?;
    let state = codec::parse(&text).map_err(|source| SyncError::Parse {
        path: STATE_FILE.to_string(),
        source,
    })?;

    debug!(
        "Loaded replica {} ({} path(s))",
        state.replica_id,
        state.files.len()
    );
    Ok(Loaded::Existing(state))
}

/// Persist `state` with write-then-replace semantics.
pub async fn save<F: FileSystem + ?Sized>(fs: &F, state: &ReplicaState) -> Result<()> {
    fs.mkdir(SYNC_DIR, FileMode::dir(0o755)).await?;
    let text = codec::render(state);
    fs.write(STATE_TMP_FILE, text.as_bytes(), FileMode::file(0o644))
        .await?;
    fs.rename(STATE_TMP_FILE, STATE_FILE).await?;
    debug!("Saved replica {} state", state.replica_id);
    Ok(())
}

//! Transport failures between a sync client and a replica server.

use replica_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Message too large ({0} bytes)")]
    TooLarge(usize),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::Transport(e.to_string())
    }
}

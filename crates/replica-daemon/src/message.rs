//! Wire messages between a sync client and a replica server.
//!
//! The handshake is JSON sent as a binary WebSocket frame (UTF-8 bytes).
//! Every frame after it is a bincode-encoded [`Request`] or [`Response`].

use replica_core::{FileMode, FileStat, InitOutcome, ReplicaState};
use serde::{Deserialize, Serialize};

/// Maximum message size (256MB). Bounds a single frame, in practice the
/// replica state, since file content travels in [`CHUNK_SIZE`] pieces.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Largest piece of file content carried by one frame.
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Handshake message exchanged when a connection opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Always "handshake"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Random identifier of the sending process, for log correlation
    #[serde(rename = "nodeId")]
    pub node_id: String,

    /// Role in the connection: "server" or "client"
    pub role: String,
}

impl HandshakeMessage {
    pub fn new(node_id: &str, role: &str) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            node_id: node_id.to_string(),
            role: role.to_string(),
        }
    }

    /// Serialize to UTF-8 JSON bytes for sending as binary WebSocket frame.
    pub fn to_binary(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Try to parse a handshake from binary data.
    ///
    /// Returns None if the data is not valid UTF-8 JSON or not a handshake message.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: Self = serde_json::from_str(text).ok()?;

        if msg.msg_type == "handshake" {
            Some(msg)
        } else {
            None
        }
    }
}

/// Quick check if data looks like a JSON handshake (starts with '{').
///
/// Bincode frames start with a little-endian variant index and never do.
pub fn is_likely_handshake(data: &[u8]) -> bool {
    data.first() == Some(&b'{')
}

/// A remote procedure call, one per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Open the root at this path on the server and load its state
    InitRoot { root: String },
    GetState,
    PutState(ReplicaState),
    /// Stage the piece of a file starting at `offset`; chunks arrive in order
    PutChunk {
        path: String,
        offset: u64,
        data: Vec<u8>,
    },
    /// Write a file from the staged chunks followed by `content`
    PutFile {
        path: String,
        content: Vec<u8>,
        mode: FileMode,
    },
    PutDir { path: String, mode: FileMode },
    RemoveFile { path: String },
    RemoveDir { path: String },
    ReportConflict { path: String },
    /// Up to [`CHUNK_SIZE`] bytes of a file, starting at `offset`
    FetchFile { path: String, offset: u64 },
    Shutdown,
}

impl Request {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::InitRoot { .. } => "InitRoot",
            Request::GetState => "GetState",
            Request::PutState(_) => "PutState",
            Request::PutChunk { .. } => "PutChunk",
            Request::PutFile { .. } => "PutFile",
            Request::PutDir { .. } => "PutDir",
            Request::RemoveFile { .. } => "RemoveFile",
            Request::RemoveDir { .. } => "RemoveDir",
            Request::ReportConflict { .. } => "ReportConflict",
            Request::FetchFile { .. } => "FetchFile",
            Request::Shutdown => "Shutdown",
        }
    }

    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(data)
    }
}

/// Reply to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Init(InitOutcome),
    State(ReplicaState),
    Written(FileStat),
    /// A piece of a file and the size of the whole file
    Chunk { data: Vec<u8>, total: u64 },
    /// The request failed on the server
    Error(String),
}

impl Response {
    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(data)
    }
}

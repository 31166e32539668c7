//! replica-daemon library: transport for replica-core.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive a real server and client.

pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod native_fs;
pub mod server;
pub mod session;

// Re-export key types for convenience
pub use client::{ReconnectConfig, RemoteReplica, calculate_backoff};
pub use error::TransportError;
pub use message::{CHUNK_SIZE, HandshakeMessage, MAX_MESSAGE_SIZE, Request, Response};
pub use native_fs::NativeFs;
pub use server::ReplicaServer;
pub use session::Session;

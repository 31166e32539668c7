//! Client side: a [`Replica`] whose procedures run on a remote server.
//!
//! Manages the connection we initiate, including:
//! - Connection establishment with handshake
//! - Bounded retry with exponential backoff while the server is not ready
//! - One request/response exchange per procedure call, with file content
//!   split into chunks
//!
//! Once connected, failures are not retried: the round aborts and the next
//! round starts from a fresh connection.

use async_trait::async_trait;
use replica_core::error::Result as SyncResult;
use replica_core::{FileMode, FileStat, InitOutcome, Replica, ReplicaId, ReplicaState, SyncError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, connect_async_with_config};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ws_config};
use crate::error::{Result, TransportError};
use crate::message::{CHUNK_SIZE, Request, Response};

type ClientConnection = Connection<MaybeTlsStream<TcpStream>>;

/// Configuration for connection retries.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Limit on TCP connect plus WebSocket upgrade for one attempt
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: Some(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Remote replica reached over a WebSocket.
pub struct RemoteReplica {
    label: String,
    /// Root directory on the server
    root: String,
    conn: Mutex<ClientConnection>,
}

impl RemoteReplica {
    /// Connect to `address` and bind the session to `root` on the server.
    ///
    /// The root itself is opened by [`Replica::init_root`].
    pub async fn connect(
        address: &str,
        root: impl Into<String>,
        config: &ReconnectConfig,
    ) -> Result<Self> {
        let node_id = ReplicaId::generate().to_string();
        let mut attempt = 0;

        let conn = loop {
            attempt += 1;
            match Self::try_connect(address, &node_id, config).await {
                Ok(conn) => break conn,
                Err(e) => {
                    if config.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(e);
                    }
                    let delay = calculate_backoff(attempt, config);
                    warn!(
                        "Connection attempt {} to {} failed: {}; retrying in {:?}",
                        attempt, address, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        info!("Connected to {}", address);
        Ok(Self {
            label: "remote".to_string(),
            root: root.into(),
            conn: Mutex::new(conn),
        })
    }

    async fn try_connect(
        address: &str,
        node_id: &str,
        config: &ReconnectConfig,
    ) -> Result<ClientConnection> {
        let (ws_stream, _) = tokio::time::timeout(
            config.connect_timeout,
            connect_async_with_config(address, Some(ws_config()), false),
        )
        .await
        .map_err(|_| TransportError::Timeout(format!("connecting to {}", address)))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let mut conn = Connection::new(address, ws_stream);
        conn.send_handshake(node_id, "client").await?;
        conn.recv_handshake("server").await?;
        Ok(conn)
    }

    /// One request/response exchange.
    async fn call(&self, request: Request) -> SyncResult<Response> {
        let name = request.name();
        let encoded = request.encode().map_err(TransportError::from)?;

        let mut conn = self.conn.lock().await;
        conn.send(encoded).await?;
        let data = conn.recv().await?.ok_or(TransportError::Closed)?;
        drop(conn);

        match Response::decode(&data).map_err(TransportError::from)? {
            Response::Error(message) => Err(SyncError::Remote(format!("{}: {}", name, message))),
            response => {
                debug!("{} -> ok", name);
                Ok(response)
            }
        }
    }

    /// Call a procedure that answers with a bare acknowledgement.
    async fn call_ok(&self, request: Request) -> SyncResult<()> {
        let name = request.name();
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn unexpected(name: &str, response: &Response) -> SyncError {
    SyncError::Transport(format!("unexpected response to {}: {:?}", name, response))
}

#[async_trait]
impl Replica for RemoteReplica {
    fn label(&self) -> &str {
        &self.label
    }

    async fn init_root(&self) -> SyncResult<InitOutcome> {
        match self
            .call(Request::InitRoot {
                root: self.root.clone(),
            })
            .await?
        {
            Response::Init(outcome) => Ok(outcome),
            other => Err(unexpected("InitRoot", &other)),
        }
    }

    async fn get_state(&self) -> SyncResult<ReplicaState> {
        match self.call(Request::GetState).await? {
            Response::State(state) => Ok(state),
            other => Err(unexpected("GetState", &other)),
        }
    }

    async fn put_state(&self, state: &ReplicaState) -> SyncResult<()> {
        self.call_ok(Request::PutState(state.clone())).await
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        mode: FileMode,
    ) -> SyncResult<FileStat> {
        // Everything but the last piece is staged on the server first
        let staged = content.len().saturating_sub(1) / CHUNK_SIZE * CHUNK_SIZE;
        let (head, last) = content.split_at(staged);
        for (index, chunk) in head.chunks(CHUNK_SIZE).enumerate() {
            self.call_ok(Request::PutChunk {
                path: path.to_string(),
                offset: (index * CHUNK_SIZE) as u64,
                data: chunk.to_vec(),
            })
            .await?;
        }

        let request = Request::PutFile {
            path: path.to_string(),
            content: last.to_vec(),
            mode,
        };
        match self.call(request).await? {
            Response::Written(stat) => Ok(stat),
            other => Err(unexpected("PutFile", &other)),
        }
    }

    async fn put_dir(&self, path: &str, mode: FileMode) -> SyncResult<()> {
        self.call_ok(Request::PutDir {
            path: path.to_string(),
            mode,
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> SyncResult<()> {
        self.call_ok(Request::RemoveFile {
            path: path.to_string(),
        })
        .await
    }

    async fn remove_dir(&self, path: &str) -> SyncResult<()> {
        self.call_ok(Request::RemoveDir {
            path: path.to_string(),
        })
        .await
    }

    async fn report_conflict(&self, path: &str) -> SyncResult<()> {
        self.call_ok(Request::ReportConflict {
            path: path.to_string(),
        })
        .await
    }

    async fn fetch_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        let mut content = Vec::new();
        loop {
            let request = Request::FetchFile {
                path: path.to_string(),
                offset: content.len() as u64,
            };
            match self.call(request).await? {
                Response::Chunk { data, total } => {
                    let done = data.is_empty();
                    content.extend_from_slice(&data);
                    if done || content.len() as u64 >= total {
                        return Ok(content);
                    }
                }
                other => return Err(unexpected("FetchFile", &other)),
            }
        }
    }

    async fn shutdown(&self) -> SyncResult<()> {
        self.call_ok(Request::Shutdown).await?;
        self.conn.lock().await.close().await;
        Ok(())
    }
}

//! WebSocket server exposing replica roots to sync clients.
//!
//! Each accepted connection gets its own [`Session`] on its own task, so
//! several clients may synchronize different roots at the same time.

use anyhow::Result;
use replica_core::ReplicaId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ws_config};
use crate::message::{Request, Response};
use crate::session::Session;

pub struct ReplicaServer {
    listener: TcpListener,
    /// Identifier sent in our handshakes
    node_id: String,
    next_conn_id: AtomicU64,
}

impl ReplicaServer {
    /// Bind to an address.
    pub async fn bind(listen_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let node_id = ReplicaId::generate().to_string();
        info!(
            "Replica server listening on {} (node {})",
            listener.local_addr()?,
            node_id
        );
        Ok(Self {
            listener,
            node_id,
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn serve(&self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let conn_id = self.next_conn_id();
            let node_id = self.node_id.clone();
            tokio::spawn(async move {
                handle_connection(stream, addr, conn_id, node_id).await;
            });
        }
    }

    /// Serve a single connection to completion, then return.
    pub async fn serve_once(&self) -> Result<()> {
        let (stream, addr) = self.listener.accept().await?;
        let conn_id = self.next_conn_id();
        handle_connection(stream, addr, conn_id, self.node_id.clone()).await;
        Ok(())
    }

    fn next_conn_id(&self) -> String {
        format!("conn-{}", self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Upgrade, handshake, then answer requests until the client leaves.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, conn_id: String, node_id: String) {
    let ws_stream = match accept_async_with_config(stream, Some(ws_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            // Health checks (like `nc -z`) connect and immediately close without
            // completing the WebSocket handshake. Log these as debug, not error.
            let err_str = e.to_string();
            if err_str.contains("Handshake not finished")
                || err_str.contains("Connection reset")
                || err_str.contains("unexpected EOF")
            {
                debug!("Connection closed before handshake from {}", addr);
            } else {
                error!("WebSocket upgrade failed for {}: {}", addr, e);
            }
            return;
        }
    };

    info!("New connection from {} (conn_id: {})", addr, conn_id);
    let mut conn = Connection::new(conn_id.clone(), ws_stream);

    if let Err(e) = conn.send_handshake(&node_id, "server").await {
        error!("Failed to send handshake to {}: {}", conn_id, e);
        return;
    }
    if let Err(e) = conn.recv_handshake("client").await {
        warn!("Dropping {}: {}", conn_id, e);
        conn.close().await;
        return;
    }

    let mut session = Session::new(conn_id.clone());
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                error!("Connection {} failed: {}", conn_id, e);
                break;
            }
        };

        let response = match Request::decode(&data) {
            Ok(request) => session.handle(request).await,
            Err(e) => {
                warn!("Malformed request from {}: {}", conn_id, e);
                Response::Error(format!("malformed request: {}", e))
            }
        };

        let encoded = match response.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode response for {}: {}", conn_id, e);
                break;
            }
        };
        if let Err(e) = conn.send(encoded).await {
            error!("Failed to send response to {}: {}", conn_id, e);
            break;
        }

        if session.is_closed() {
            conn.close().await;
            break;
        }
    }

    info!("Connection {} finished", conn_id);
}

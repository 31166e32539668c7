//! Framing over one WebSocket stream.
//!
//! Both ends use the same connection type: binary frames carry either the
//! JSON handshake or a bincode request/response. Control frames are handled
//! here and never surface to callers.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::message::{HandshakeMessage, MAX_MESSAGE_SIZE, is_likely_handshake};

/// How long either side waits for the other's handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket limits sized for whole-file transfers.
pub fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// A single WebSocket connection, either accepted or initiated.
pub struct Connection<S> {
    /// Connection label for logs (e.g. "conn-1" or the remote address)
    label: String,
    ws: WebSocketStream<S>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(label: impl Into<String>, ws: WebSocketStream<S>) -> Self {
        Self {
            label: label.into(),
            ws,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send binary data to the peer.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::TooLarge(data.len()));
        }
        self.ws.send(Message::Binary(data.into())).await?;
        Ok(())
    }

    /// Next data frame, or None once the peer has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let data = match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame from {}", self.label);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("Connection {} closed", self.label);
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
            };

            if data.len() > MAX_MESSAGE_SIZE {
                warn!(
                    "Message from {} exceeds max size ({} > {})",
                    self.label,
                    data.len(),
                    MAX_MESSAGE_SIZE
                );
                return Err(TransportError::TooLarge(data.len()));
            }
            return Ok(Some(data));
        }
    }

    pub async fn send_handshake(&mut self, node_id: &str, role: &str) -> Result<()> {
        let handshake = HandshakeMessage::new(node_id, role)
            .to_binary()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        self.send(handshake).await
    }

    /// Wait for the peer's handshake, which must be the first frame.
    pub async fn recv_handshake(&mut self, expected_role: &str) -> Result<HandshakeMessage> {
        let data = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.recv())
            .await
            .map_err(|_| TransportError::Timeout(format!("handshake from {}", self.label)))??
            .ok_or(TransportError::Closed)?;

        if !is_likely_handshake(&data) {
            return Err(TransportError::Handshake(format!(
                "{} sent a request before its handshake",
                self.label
            )));
        }
        let handshake = HandshakeMessage::from_binary(&data).ok_or_else(|| {
            TransportError::Handshake(format!("invalid handshake from {}", self.label))
        })?;
        if handshake.role != expected_role {
            return Err(TransportError::Handshake(format!(
                "expected role {}, got {}",
                expected_role, handshake.role
            )));
        }

        debug!(
            "Received handshake from {} (node_id: {}, role: {})",
            self.label, handshake.node_id, handshake.role
        );
        Ok(handshake)
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Error closing {}: {}", self.label, e);
        }
    }
}

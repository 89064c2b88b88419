//! WebSocket transport to the CSMS (spec.md §2 bullet "connection",
//! §6 "External interfaces" wire protocol).
//!
//! `Connection` is the collaborator boundary the engine/queue depend on;
//! `TungsteniteConnection` is a thin client built the same way the
//! teacher's `interfaces/ws/ocpp_server.rs` frames its (server-side)
//! sockets — `futures_util::{SinkExt, StreamExt}` over a
//! `tokio-tungstenite` `Message` stream — mirrored to the client role via
//! `connect_async` instead of `TcpListener::accept`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
}

/// The transport boundary the rest of the crate depends on — queue and
/// engine never touch `tokio-tungstenite` directly, only this trait, so
/// tests can swap in an in-memory double.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;
    async fn recv_text(&mut self) -> Result<Option<String>, ConnectionError>;
}

pub struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TungsteniteConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", OCPP16_SUBPROTOCOL.parse().unwrap());
        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        info!(status = %response.status(), "connected to CSMS");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Connection for TungsteniteConnection {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Result<Option<String>, ConnectionError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_other)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read error");
                    return Err(ConnectionError::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory double used by queue/engine tests that need a
    /// `Connection` without a real socket.
    pub struct MemConnection {
        pub sent: Mutex<Vec<String>>,
        pub inbox: Mutex<VecDeque<String>>,
    }

    impl MemConnection {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
            }
        }
    }

    #[async_trait]
    impl Connection for MemConnection {
        async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>, ConnectionError> {
            Ok(self.inbox.lock().unwrap().pop_front())
        }
    }

    #[tokio::test]
    async fn mem_connection_records_sent_text() {
        let mut conn = MemConnection::new();
        conn.send_text("hello".to_string()).await.unwrap();
        assert_eq!(conn.sent.lock().unwrap().as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn mem_connection_drains_inbox_fifo() {
        let mut conn = MemConnection::new();
        conn.inbox.lock().unwrap().push_back("a".to_string());
        conn.inbox.lock().unwrap().push_back("b".to_string());
        assert_eq!(conn.recv_text().await.unwrap(), Some("a".to_string()));
        assert_eq!(conn.recv_text().await.unwrap(), Some("b".to_string()));
        assert_eq!(conn.recv_text().await.unwrap(), None);
    }
}

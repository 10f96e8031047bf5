//! WebSocket transport
//!
//! Opens the orchestrator socket and splits it into the sink and stream
//! halves used by the session.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use fci_core::error::TransportError;
use fci_core::traits::{Connector, FrameSink, FrameStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the orchestrator over WebSocket
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

/// Socket URL with the credentials query removed
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[async_trait]
impl Connector for WsConnector {
    type Sink = WsSink;
    type Stream = WsStream;

    async fn connect(&self, url: &Url) -> Result<(WsSink, WsStream), TransportError> {
        tracing::debug!("Opening WebSocket to {}", redacted(url));

        let (socket, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed {
                endpoint: redacted(url),
                reason: e.to_string(),
            })?;

        tracing::debug!("WebSocket handshake completed ({})", response.status());

        let (sink, stream) = socket.split();
        Ok((WsSink { inner: sink }, WsStream { inner: stream }))
    }
}

/// Write half of the orchestrator socket
pub struct WsSink {
    inner: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

/// Read half of the orchestrator socket
pub struct WsStream {
    inner: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Ignoring non UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Orchestrator closed the socket: {:?}", frame);
                    return None;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::ConnectionLost(e.to_string()))),
            }
        }
    }
}

//! Transport traits
//!
//! A connection is split into a sink and a stream so that the read loop can
//! own the stream while writers share the sink behind a lock.

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// Write half of a message-oriented connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a message-oriented connection
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens connections to the orchestrator
#[async_trait]
pub trait Connector: Send + Sync {
    /// Write half produced by this connector
    type Sink: FrameSink + 'static;
    /// Read half produced by this connector
    type Stream: FrameStream + 'static;

    /// Open a connection to `url`
    async fn connect(&self, url: &Url) -> Result<(Self::Sink, Self::Stream), TransportError>;
}

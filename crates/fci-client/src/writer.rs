//! Serialized frame writer
//!
//! The read loop and every result-report task write to the same socket. All
//! of them go through one [`FrameWriter`] behind a [`SharedWriter`] lock, so
//! frames never interleave and refs follow wire order.

use std::sync::Arc;

use tokio::sync::Mutex;

use fci_core::error::{FciError, TransportError};
use fci_core::traits::FrameSink;
use fci_protocol::{MessageEncoder, OutboundEvent, ProtocolError, Topic};

/// Writer shared between the read loop and report tasks
pub type SharedWriter<S> = Arc<Mutex<FrameWriter<S>>>;

/// Owns the sink and the ref counter of one connection
pub struct FrameWriter<S> {
    sink: S,
    encoder: MessageEncoder,
    closed: bool,
}

impl<S: FrameSink> FrameWriter<S> {
    /// Create a writer for a topic
    pub fn new(sink: S, topic: Topic) -> Self {
        Self {
            sink,
            encoder: MessageEncoder::new(topic),
            closed: false,
        }
    }

    /// Wrap in a [`SharedWriter`]
    pub fn shared(self) -> SharedWriter<S> {
        Arc::new(Mutex::new(self))
    }

    /// Number of messages sent so far
    pub fn sent(&self) -> u64 {
        self.encoder.sent()
    }

    /// Whether `leave_and_close` has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one event, returning the ref it was tagged with
    pub async fn send(&mut self, event: OutboundEvent) -> Result<u64, FciError> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }

        let message = self.encoder.message(&event);
        let text = serde_json::to_string(&message).map_err(ProtocolError::from)?;
        tracing::debug!(
            "Sending '{}' (ref {}) on {}: {}",
            message.event,
            message.reference,
            message.topic,
            message.payload
        );

        self.sink.send_text(text).await?;
        Ok(message.reference)
    }

    /// Send `leave` and close the connection
    ///
    /// Runs at most once; later calls are no-ops. The close is attempted even
    /// if `leave` could not be sent, and the first failure is returned.
    pub async fn leave_and_close(&mut self) -> Result<(), FciError> {
        if self.closed {
            return Ok(());
        }

        let leave = self.send(OutboundEvent::Leave).await.map(|_| ());
        self.closed = true;
        let close = self.sink.close().await.map_err(FciError::from);

        tracing::debug!("Connection closed after {} messages", self.sent());
        leave.and(close)
    }
}

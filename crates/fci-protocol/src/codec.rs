//! JSON codec for channel messages

use crate::error::ProtocolError;
use crate::frame::{InboundFrame, ProtocolMessage, RawFrame};
use crate::message::OutboundEvent;
use crate::node::Topic;

/// Builds outbound frames for one connection
///
/// Owns the `ref` counter: every built message takes the next value, starting
/// at 1. Refs are never reused.
#[derive(Debug)]
pub struct MessageEncoder {
    /// Build topic
    topic: Topic,
    /// Ref for the next message
    next_ref: u64,
}

impl MessageEncoder {
    /// Create an encoder for a topic
    pub fn new(topic: Topic) -> Self {
        Self { topic, next_ref: 1 }
    }

    /// Build topic
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Number of messages built so far
    pub fn sent(&self) -> u64 {
        self.next_ref - 1
    }

    /// Build the next message, consuming a ref
    pub fn message(&mut self, event: &OutboundEvent) -> ProtocolMessage {
        let reference = self.next_ref;
        self.next_ref += 1;

        let topic = event
            .topic_override()
            .map(str::to_string)
            .unwrap_or_else(|| self.topic.as_str().to_string());

        ProtocolMessage {
            topic,
            event: event.name().to_string(),
            payload: event.payload(),
            reference,
        }
    }

    /// Build and serialize the next message
    pub fn encode(&mut self, event: &OutboundEvent) -> Result<String, ProtocolError> {
        let message = self.message(event);
        Ok(serde_json::to_string(&message)?)
    }
}

/// Decode a text frame received from the orchestrator
pub fn decode_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let frame = InboundFrame::from_raw(raw);
    tracing::trace!("Decoded '{}' frame on {}", frame.event(), frame.topic());
    Ok(frame)
}

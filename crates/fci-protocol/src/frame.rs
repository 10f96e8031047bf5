//! Channel envelopes
//!
//! Every frame on the socket is a JSON object with four fields:
//! `topic`, `event`, `payload` and `ref`. The orchestrator answers some
//! requests with a channel reply, where the interesting event sits at
//! `payload.response.event`, and pushes other events as broadcasts with the
//! event at the top level. Both shapes are modelled here and normalized to a
//! single [`InboundEvent`] by [`InboundFrame::into_event`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{events, InboundEvent};

/// An outbound channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Channel topic
    pub topic: String,
    /// Event name
    pub event: String,
    /// Event payload (always a JSON object)
    pub payload: Value,
    /// Per-connection sequence number, starting at 1
    #[serde(rename = "ref")]
    pub reference: u64,
}

/// Envelope as it arrives on the wire
#[derive(Debug, Deserialize)]
pub(crate) struct RawFrame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    /// Servers send refs as numbers, strings or null; they are not interpreted
    #[serde(rename = "ref", default)]
    reference: Option<Value>,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Reply to a channel push (`phx_reply`)
    Reply {
        topic: String,
        /// Nested `payload.response.event`, or `phx_reply` when absent
        event: String,
        /// `payload.status` (`"ok"` / `"error"`)
        status: Option<String>,
        /// `payload.response`
        response: Value,
        reference: Option<Value>,
    },
    /// Server push with the event at the top level
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
        reference: Option<Value>,
    },
}

impl InboundFrame {
    pub(crate) fn from_raw(raw: RawFrame) -> Self {
        let RawFrame {
            topic,
            event,
            mut payload,
            reference,
        } = raw;

        let nested_event = payload
            .get("response")
            .and_then(|response| response.get("event"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if nested_event.is_none() && event != events::PHX_REPLY {
            return InboundFrame::Broadcast {
                topic,
                event,
                payload,
                reference,
            };
        }

        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        let response = payload
            .get_mut("response")
            .map(Value::take)
            .unwrap_or(Value::Null);

        InboundFrame::Reply {
            topic,
            event: nested_event.unwrap_or(event),
            status,
            response,
            reference,
        }
    }

    /// Topic the frame was sent on
    pub fn topic(&self) -> &str {
        match self {
            InboundFrame::Reply { topic, .. } | InboundFrame::Broadcast { topic, .. } => topic,
        }
    }

    /// Effective event name
    pub fn event(&self) -> &str {
        match self {
            InboundFrame::Reply { event, .. } | InboundFrame::Broadcast { event, .. } => event,
        }
    }

    /// Normalize into the event the session acts on
    ///
    /// A reply with status `"error"` becomes [`InboundEvent::Error`] carrying
    /// the response body.
    pub fn into_event(self) -> Result<InboundEvent, ProtocolError> {
        match self {
            InboundFrame::Reply {
                status, response, ..
            } if status.as_deref() == Some("error") => Ok(InboundEvent::Error(response)),
            InboundFrame::Reply {
                event, response, ..
            } => InboundEvent::from_parts(&event, response),
            InboundFrame::Broadcast { event, payload, .. } => {
                InboundEvent::from_parts(&event, payload)
            }
        }
    }
}

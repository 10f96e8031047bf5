//! Message types for the fast-ci orchestration protocol
//!
//! This module defines the typed events exchanged between a node and the
//! orchestrator. Frames are built and parsed by the codec in `codec.rs`; the
//! events here carry only the payload shapes.
//!
//! # Message Flow
//!
//! Typical message sequence for a node:
//!
//! 1. Node connects and sends `phx_join` on the build topic
//! 2. Orchestrator replies with `join` carrying the node index
//! 3. The leader (index 0) sends `enq` with the full test inventory
//! 4. Orchestrator sends `deq_request`, node answers with an empty `deq`
//! 5. Orchestrator sends `deq` with a batch, node reports results with `deq`
//! 6. An empty `deq` batch ends the run; node sends `leave` and disconnects

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::node::NodeIndex;

/// Event names used on the wire
pub mod events {
    /// Channel join request (node -> orchestrator)
    pub const PHX_JOIN: &str = "phx_join";
    /// Channel reply envelope (orchestrator -> node)
    pub const PHX_REPLY: &str = "phx_reply";
    /// Join acknowledgment carrying the node index
    pub const JOIN: &str = "join";
    /// Inventory submission (leader only)
    pub const ENQ: &str = "enq";
    /// Inventory request; also the name of the inventory callback
    pub const ENQ_REQUEST: &str = "enq_request";
    /// Batch request, batch delivery and result report
    pub const DEQ: &str = "deq";
    /// Orchestrator asking the node to request a batch
    pub const DEQ_REQUEST: &str = "deq_request";
    /// Fatal orchestrator error
    pub const ERROR: &str = "error";
    /// Session end (node -> orchestrator)
    pub const LEAVE: &str = "leave";
    /// Socket keepalive
    pub const HEARTBEAT: &str = "heartbeat";
    /// Topic used for socket keepalives
    pub const HEARTBEAT_TOPIC: &str = "phoenix";
}

/// Collection of opaque test identifiers
///
/// The orchestrator may hand out either a list of identifiers or a mapping of
/// identifier to metadata. Both shapes are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestBatch(Value);

impl TestBatch {
    /// Wrap a raw JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// A batch that signals no more work
    pub fn empty() -> Self {
        Self(Value::Array(Vec::new()))
    }

    /// Number of tests in the batch
    pub fn len(&self) -> usize {
        match &self.0 {
            Value::Null => 0,
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(s) if s.is_empty() => 0,
            _ => 1,
        }
    }

    /// Whether the batch holds no tests
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test identifiers as strings
    ///
    /// Array items that are strings are returned as-is, other items in their
    /// JSON form. For mappings the keys are the identifiers.
    pub fn ids(&self) -> Vec<String> {
        match &self.0 {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Value::Object(map) => map.keys().cloned().collect(),
            Value::String(s) if s.is_empty() => Vec::new(),
            Value::String(s) => vec![s.clone()],
            other => vec![other.to_string()],
        }
    }

    /// Borrow the raw JSON value
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for TestBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(Value::Array(
            iter.into_iter().map(|s| Value::String(s.into())).collect(),
        ))
    }
}

impl From<Value> for TestBatch {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Per-test execution outcomes keyed by test identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(Map<String, Value>);

impl ResultSet {
    /// Create an empty result set
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Record the outcome of one test
    pub fn insert(&mut self, test: impl Into<String>, outcome: Value) {
        self.0.insert(test.into(), outcome);
    }

    /// Outcome recorded for a test
    pub fn get(&self, test: &str) -> Option<&Value> {
        self.0.get(test)
    }

    /// Number of recorded outcomes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no outcome was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over (test, outcome) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ResultSet {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Payload of the `join` acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReply {
    /// Index assigned to this node
    pub node_index: NodeIndex,
    /// Run state; `"running"` once batches are being handed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl JoinReply {
    /// State reported while batches are already being distributed
    pub const RUNNING: &'static str = "running";

    /// Whether the node joined a run already in progress
    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some(Self::RUNNING)
    }
}

#[derive(Debug, Deserialize)]
struct DeqDelivery {
    #[serde(default)]
    tests: TestBatch,
}

/// Messages sent by the node
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Join the build topic
    Join,
    /// Submit the full test inventory
    Enq { tests: TestBatch },
    /// Ask for the next batch
    DeqRequest,
    /// Report the outcomes of an executed batch
    Report(ResultSet),
    /// Leave the build topic
    Leave,
    /// Socket keepalive
    Heartbeat,
}

impl OutboundEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Join => events::PHX_JOIN,
            OutboundEvent::Enq { .. } => events::ENQ,
            OutboundEvent::DeqRequest | OutboundEvent::Report(_) => events::DEQ,
            OutboundEvent::Leave => events::LEAVE,
            OutboundEvent::Heartbeat => events::HEARTBEAT,
        }
    }

    /// Payload on the wire
    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::Enq { tests } => {
                let mut map = Map::new();
                map.insert("tests".to_string(), tests.as_value().clone());
                Value::Object(map)
            }
            OutboundEvent::Report(results) => Value::Object(results.0.clone()),
            OutboundEvent::Join
            | OutboundEvent::DeqRequest
            | OutboundEvent::Leave
            | OutboundEvent::Heartbeat => Value::Object(Map::new()),
        }
    }

    /// Topic to use instead of the build topic, if any
    pub fn topic_override(&self) -> Option<&'static str> {
        match self {
            OutboundEvent::Heartbeat => Some(events::HEARTBEAT_TOPIC),
            _ => None,
        }
    }
}

/// Messages received from the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Join acknowledgment
    Join(JoinReply),
    /// Orchestrator asks the node to request a batch
    DeqRequest,
    /// Batch delivery; empty means no more work
    Deq(TestBatch),
    /// Fatal orchestrator error
    Error(Value),
    /// Event this client does not act on
    Other { event: String, payload: Value },
}

impl InboundEvent {
    /// Parse an event from its name and payload body
    pub fn from_parts(event: &str, payload: Value) -> Result<Self, ProtocolError> {
        let invalid = |source: serde_json::Error| ProtocolError::InvalidPayload {
            event: event.to_string(),
            source,
        };

        match event {
            events::JOIN => serde_json::from_value(payload)
                .map(InboundEvent::Join)
                .map_err(invalid),
            events::DEQ_REQUEST => Ok(InboundEvent::DeqRequest),
            events::DEQ => serde_json::from_value::<DeqDelivery>(payload)
                .map(|delivery| InboundEvent::Deq(delivery.tests))
                .map_err(invalid),
            events::ERROR => Ok(InboundEvent::Error(payload)),
            other => Ok(InboundEvent::Other {
                event: other.to_string(),
                payload,
            }),
        }
    }

    /// Event name
    pub fn name(&self) -> &str {
        match self {
            InboundEvent::Join(_) => events::JOIN,
            InboundEvent::DeqRequest => events::DEQ_REQUEST,
            InboundEvent::Deq(_) => events::DEQ,
            InboundEvent::Error(_) => events::ERROR,
            InboundEvent::Other { event, .. } => event,
        }
    }
}

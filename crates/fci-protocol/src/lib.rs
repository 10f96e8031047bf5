//! fci-protocol: Wire protocol for fast-ci test orchestration
//!
//! This crate defines the JSON channel messages exchanged between a CI node
//! and the test orchestrator over a WebSocket connection.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod node;

pub use codec::{decode_frame, MessageEncoder};
pub use error::ProtocolError;
pub use frame::{InboundFrame, ProtocolMessage};
pub use message::{InboundEvent, JoinReply, OutboundEvent, ResultSet, TestBatch};
pub use node::{NodeIndex, Topic};

//! Transport to the orchestrator

mod ws;

pub use ws::{WsConnector, WsSink, WsStream};

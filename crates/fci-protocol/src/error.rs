//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a valid JSON channel envelope
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A known event carried a payload of the wrong shape
    #[error("Invalid payload for '{event}' event: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    /// The orchestrator reported an error; the payload is kept verbatim
    #[error("Orchestrator error: {0}")]
    Orchestrator(serde_json::Value),
}

//! Core error types for fast-ci

use fci_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a fast-ci session
#[derive(Error, Debug)]
pub enum FciError {
    /// Protocol error, including errors reported by the orchestrator
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Callback registration error
    #[error("Registration error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-related errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Connection attempt exceeded the configured timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Connection dropped mid-session
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A frame could not be written
    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    /// The writer was already closed
    #[error("Connection already closed")]
    Closed,
}

/// Callback registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Event is not one of the supported callback events
    #[error("Event '{event}' not supported. Supported events are {supported:?}")]
    UnsupportedEvent {
        event: String,
        supported: &'static [&'static str],
    },

    /// A handler is already registered for the event
    #[error("Event '{0}' is already defined")]
    AlreadyRegistered(String),

    /// Handler kind does not match the event it was registered for
    #[error("Handler for '{expected}' cannot be registered as '{event}'")]
    HandlerMismatch {
        event: String,
        expected: &'static str,
    },

    /// A handler required by the session was never registered
    #[error("No handler registered for '{0}'")]
    MissingHandler(&'static str),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// A batch callback panicked or its task was lost
    #[error("Batch callback failed: {0}")]
    CallbackFailed(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Run key was not provided
    #[error("run_key was not configured")]
    MissingRunKey,

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// CI service the node is running under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiProvider {
    /// RubyCI
    RubyCi,
    /// GitHub Actions
    GithubActions,
    /// CircleCI
    CircleCi,
    /// Anything else; only `BUILD_ID` and git are consulted
    Generic,
}

impl fmt::Display for CiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiProvider::RubyCi => write!(f, "rubyci"),
            CiProvider::GithubActions => write!(f, "github-actions"),
            CiProvider::CircleCi => write!(f, "circleci"),
            CiProvider::Generic => write!(f, "generic"),
        }
    }
}

/// Lifecycle state of an orchestration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection yet
    Disconnected,
    /// Socket is open
    Connected,
    /// `phx_join` sent, waiting for the node index
    Joining,
    /// Node index assigned, exchanging batches
    Active,
    /// Read loop finished, sending `leave`
    Closing,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether the session has reached its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Joining => write!(f, "joining"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

//! fci-core: Core abstractions and configuration for fast-ci
//!
//! This crate provides the error taxonomy, the run context describing which
//! build a node belongs to, session configuration, and the transport traits
//! used by the orchestration client.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{RunContext, SessionConfig};
pub use error::FciError;
pub use types::{CiProvider, SessionState};

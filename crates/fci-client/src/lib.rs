//! fci-client: Test orchestration client for fast-ci
//!
//! The client joins a build's orchestration channel, submits the test
//! inventory when it is the leader, and pulls batches of tests to run until
//! the orchestrator signals that no work is left.
//!
//! ```ignore
//! use fci_client::{CallbackRegistry, OrchestrationClient};
//! use fci_core::RunContext;
//!
//! let mut callbacks = CallbackRegistry::new();
//! callbacks.on_enq_request(|| ["spec/a_spec.rb", "spec/b_spec.rb"].into_iter().collect())?;
//! callbacks.on_deq(|batch| run_tests(batch))?;
//!
//! let summary = OrchestrationClient::new(RunContext::from_env()?, callbacks).run_blocking()?;
//! ```

pub mod client;
pub mod registry;
mod session;
pub mod transport;
pub mod writer;

pub use client::{OrchestrationClient, SessionSummary};
pub use registry::{CallbackRegistry, Handler, SUPPORTED_EVENTS};
pub use transport::WsConnector;

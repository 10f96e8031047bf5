//! Callback registry
//!
//! The embedding program supplies two callbacks: `enq_request` produces the
//! full test inventory (called at most once, on the leader) and `deq` runs a
//! batch and returns per-test results (called once per delivered batch).
//! Each event accepts exactly one handler; handlers cannot be replaced.

use std::fmt;
use std::sync::Arc;

use fci_core::error::RegistryError;
use fci_protocol::message::events;
use fci_protocol::{ResultSet, TestBatch};

/// Events that accept a callback
pub const SUPPORTED_EVENTS: &[&str] = &[events::ENQ_REQUEST, events::DEQ];

/// Produces the test inventory
pub type EnqRequestFn = Box<dyn FnOnce() -> TestBatch + Send>;

/// Runs a batch of tests
pub type DeqFn = Arc<dyn Fn(TestBatch) -> ResultSet + Send + Sync>;

/// A callback for one of the [`SUPPORTED_EVENTS`]
pub enum Handler {
    /// Inventory producer for `enq_request`
    EnqRequest(EnqRequestFn),
    /// Batch runner for `deq`
    Deq(DeqFn),
}

impl Handler {
    /// Wrap an inventory producer
    pub fn enq_request<F>(f: F) -> Self
    where
        F: FnOnce() -> TestBatch + Send + 'static,
    {
        Handler::EnqRequest(Box::new(f))
    }

    /// Wrap a batch runner
    pub fn deq<F>(f: F) -> Self
    where
        F: Fn(TestBatch) -> ResultSet + Send + Sync + 'static,
    {
        Handler::Deq(Arc::new(f))
    }

    /// Event this handler serves
    pub fn event(&self) -> &'static str {
        match self {
            Handler::EnqRequest(_) => events::ENQ_REQUEST,
            Handler::Deq(_) => events::DEQ,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.event())
    }
}

/// Write-once mapping from event name to handler
#[derive(Default)]
pub struct CallbackRegistry {
    enq_request: Option<EnqRequestFn>,
    deq: Option<DeqFn>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`
    ///
    /// Fails if the event is not supported, already has a handler, or does
    /// not match the handler's kind.
    pub fn on(&mut self, event: &str, handler: Handler) -> Result<(), RegistryError> {
        if !SUPPORTED_EVENTS.iter().any(|supported| *supported == event) {
            return Err(RegistryError::UnsupportedEvent {
                event: event.to_string(),
                supported: SUPPORTED_EVENTS,
            });
        }

        if self.is_registered(event) {
            return Err(RegistryError::AlreadyRegistered(event.to_string()));
        }

        if handler.event() != event {
            return Err(RegistryError::HandlerMismatch {
                event: event.to_string(),
                expected: handler.event(),
            });
        }

        tracing::debug!("Registered '{}' callback", event);
        match handler {
            Handler::EnqRequest(f) => self.enq_request = Some(f),
            Handler::Deq(f) => self.deq = Some(f),
        }
        Ok(())
    }

    /// Register the inventory producer
    pub fn on_enq_request<F>(&mut self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> TestBatch + Send + 'static,
    {
        self.on(events::ENQ_REQUEST, Handler::enq_request(f))
    }

    /// Register the batch runner
    pub fn on_deq<F>(&mut self, f: F) -> Result<(), RegistryError>
    where
        F: Fn(TestBatch) -> ResultSet + Send + Sync + 'static,
    {
        self.on(events::DEQ, Handler::deq(f))
    }

    /// Whether `event` has a handler
    pub fn is_registered(&self, event: &str) -> bool {
        match event {
            events::ENQ_REQUEST => self.enq_request.is_some(),
            events::DEQ => self.deq.is_some(),
            _ => false,
        }
    }

    /// Take the inventory producer; it can only run once
    pub(crate) fn take_enq_request(&mut self) -> Option<EnqRequestFn> {
        self.enq_request.take()
    }

    /// Shared handle to the batch runner
    pub(crate) fn deq_handler(&self) -> Option<DeqFn> {
        self.deq.clone()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("enq_request", &self.enq_request.is_some())
            .field("deq", &self.deq.is_some())
            .finish()
    }
}

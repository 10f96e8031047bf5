//! Orchestration client entry point

use serde::Serialize;

use fci_core::config::{RunContext, SessionConfig};
use fci_core::error::{FciError, RegistryError, TransportError};
use fci_core::traits::Connector;
use fci_protocol::message::events;
use fci_protocol::{NodeIndex, Topic};

use crate::registry::{CallbackRegistry, Handler};
use crate::session::Session;
use crate::transport::WsConnector;

/// Outcome of a session that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Index assigned by the orchestrator, if a join was received
    pub node_index: Option<NodeIndex>,
    /// Number of batches executed on this node
    pub batches: usize,
    /// Number of messages sent, `phx_join` and `leave` included
    pub messages_sent: u64,
}

/// Drives one node through an orchestrated test run
///
/// Built from an explicit [`RunContext`] and [`CallbackRegistry`]; each call
/// to [`run`](Self::run) consumes the client and opens exactly one
/// connection.
pub struct OrchestrationClient<C = WsConnector> {
    context: RunContext,
    config: SessionConfig,
    callbacks: CallbackRegistry,
    connector: C,
}

impl OrchestrationClient<WsConnector> {
    /// Create a client that connects over WebSocket
    pub fn new(context: RunContext, callbacks: CallbackRegistry) -> Self {
        Self {
            context,
            config: SessionConfig::default(),
            callbacks,
            connector: WsConnector::new(),
        }
    }
}

impl<C: Connector> OrchestrationClient<C> {
    /// Replace the session configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different transport
    pub fn with_connector<D: Connector>(self, connector: D) -> OrchestrationClient<D> {
        OrchestrationClient {
            context: self.context,
            config: self.config,
            callbacks: self.callbacks,
            connector,
        }
    }

    /// Register a callback; see [`CallbackRegistry::on`]
    pub fn on(&mut self, event: &str, handler: Handler) -> Result<(), RegistryError> {
        self.callbacks.on(event, handler)
    }

    /// Run context of this client
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Channel topic this client joins
    pub fn topic(&self) -> Topic {
        self.context.topic()
    }

    /// Run the session until the orchestrator runs out of work
    ///
    /// Any transport failure, orchestrator `error` event or callback failure
    /// ends the session; there is no reconnection. `leave` is sent and the
    /// connection closed on every path once connected.
    pub async fn run(self) -> Result<SessionSummary, FciError> {
        let deq = self
            .callbacks
            .deq_handler()
            .ok_or(RegistryError::MissingHandler(events::DEQ))?;

        let scheme = self.config.scheme();
        let url = self.context.socket_url(scheme)?;
        let endpoint = self.context.endpoint(scheme);

        tracing::info!("Connecting to orchestrator at {}", endpoint);
        let (sink, stream) =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&url))
                .await
                .map_err(|_| TransportError::ConnectTimeout(endpoint.clone()))??;

        let topic = self.context.topic();
        tracing::info!("Connected to orchestrator, joining {}", topic);

        Session::new(
            sink,
            stream,
            topic,
            self.callbacks,
            deq,
            self.config.heartbeat_interval,
        )
        .run()
        .await
    }

    /// Blocking variant of [`run`](Self::run) on a fresh tokio runtime
    pub fn run_blocking(self) -> Result<SessionSummary, FciError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run())
    }
}

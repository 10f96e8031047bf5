//! Orchestration session state machine
//!
//! One session drives a single connection from `phx_join` to `leave`:
//!
//! - `join` assigns the node index. The leader (index 0) submits the
//!   inventory; a node joining a run that is already `running` asks for work
//!   right away.
//! - `deq_request` is answered with an empty `deq`.
//! - A non-empty `deq` batch is handed to the batch callback in its own task,
//!   whose result is reported back while the loop keeps reading.
//! - An empty `deq` batch ends the run.
//! - `error` ends the session with the orchestrator's payload.
//!
//! Whatever ends the read loop, `leave` is sent and the connection closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use fci_core::error::{FciError, RegistryError, SessionError, TransportError};
use fci_core::traits::{FrameSink, FrameStream};
use fci_core::SessionState;
use fci_protocol::message::events;
use fci_protocol::{
    decode_frame, InboundEvent, JoinReply, NodeIndex, OutboundEvent, ProtocolError, TestBatch,
    Topic,
};

use crate::client::SessionSummary;
use crate::registry::{CallbackRegistry, DeqFn};
use crate::writer::{FrameWriter, SharedWriter};

/// Whether the read loop keeps going
enum Flow {
    Continue,
    Finished,
}

type ReportResult = Result<(), FciError>;

/// A connected session
pub(crate) struct Session<S, R> {
    state: SessionState,
    node_index: Option<NodeIndex>,
    writer: SharedWriter<S>,
    stream: R,
    callbacks: CallbackRegistry,
    deq: DeqFn,
    /// In-flight result reports
    pending: JoinSet<ReportResult>,
    batches: usize,
    heartbeat: Option<Duration>,
}

impl<S, R> Session<S, R>
where
    S: FrameSink + 'static,
    R: FrameStream,
{
    pub(crate) fn new(
        sink: S,
        stream: R,
        topic: Topic,
        callbacks: CallbackRegistry,
        deq: DeqFn,
        heartbeat: Option<Duration>,
    ) -> Self {
        Self {
            state: SessionState::Connected,
            node_index: None,
            writer: FrameWriter::new(sink, topic).shared(),
            stream,
            callbacks,
            deq,
            pending: JoinSet::new(),
            batches: 0,
            heartbeat,
        }
    }

    /// Run the session to completion
    pub(crate) async fn run(mut self) -> Result<SessionSummary, FciError> {
        self.transition(SessionState::Joining);
        let outcome = match self.send(OutboundEvent::Join).await {
            Ok(_) => self.read_loop().await,
            Err(e) => Err(e),
        };

        self.transition(SessionState::Closing);
        let outcome = match outcome {
            Ok(()) => self.drain_reports().await,
            Err(e) => {
                if !self.pending.is_empty() {
                    tracing::debug!("Aborting {} pending result reports", self.pending.len());
                }
                self.pending.shutdown().await;
                Err(e)
            }
        };

        let cleanup = self.writer.lock().await.leave_and_close().await;
        self.transition(SessionState::Closed);

        if let Err(e) = cleanup {
            tracing::warn!("Failed to leave cleanly: {}", e);
        }
        outcome?;

        let summary = SessionSummary {
            node_index: self.node_index,
            batches: self.batches,
            messages_sent: self.writer.lock().await.sent(),
        };
        tracing::info!(
            "Session finished: {} batches run, {} messages sent",
            summary.batches,
            summary.messages_sent
        );
        Ok(summary)
    }

    async fn read_loop(&mut self) -> Result<(), FciError> {
        let mut heartbeat = self.heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                frame = self.stream.next_text() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(TransportError::ConnectionLost(
                                "orchestrator closed the connection before the run finished"
                                    .to_string(),
                            )
                            .into())
                        }
                    };

                    if let Flow::Finished = self.handle_text(&text).await? {
                        return Ok(());
                    }
                }

                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    reap(joined)?;
                }

                _ = tick(&mut heartbeat) => {
                    self.send(OutboundEvent::Heartbeat).await?;
                }
            }
        }
    }

    async fn handle_text(&mut self, text: &str) -> Result<Flow, FciError> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Skipping undecodable frame: {}", e);
                return Ok(Flow::Continue);
            }
        };

        tracing::debug!("Received '{}' on {}", frame.event(), frame.topic());
        let event = frame.into_event()?;
        self.handle_event(event).await
    }

    async fn handle_event(&mut self, event: InboundEvent) -> Result<Flow, FciError> {
        match event {
            InboundEvent::Join(reply) => self.on_join(reply).await?,

            InboundEvent::DeqRequest => {
                self.warn_if_not_joined(events::DEQ_REQUEST);
                self.send(OutboundEvent::DeqRequest).await?;
            }

            InboundEvent::Deq(batch) if batch.is_empty() => {
                tracing::info!("Orchestrator has no more tests for this node");
                return Ok(Flow::Finished);
            }

            InboundEvent::Deq(batch) => {
                self.warn_if_not_joined(events::DEQ);
                self.dispatch_batch(batch);
            }

            InboundEvent::Error(detail) => {
                tracing::error!("Orchestrator reported an error: {}", detail);
                return Err(ProtocolError::Orchestrator(detail).into());
            }

            InboundEvent::Other { event, payload } => {
                tracing::info!("Ignoring '{}' event: {}", event, payload);
            }
        }

        Ok(Flow::Continue)
    }

    async fn on_join(&mut self, reply: JoinReply) -> Result<(), FciError> {
        if let Some(current) = self.node_index {
            tracing::warn!(
                "Ignoring repeated join as {} (already joined as {})",
                reply.node_index,
                current
            );
            return Ok(());
        }

        let node_index = reply.node_index;
        self.node_index = Some(node_index);
        tracing::info!(
            "Joined as {}{}",
            node_index,
            if node_index.is_leader() { " (leader)" } else { "" }
        );

        if node_index.is_leader() {
            let enq_request = self
                .callbacks
                .take_enq_request()
                .ok_or(RegistryError::MissingHandler(events::ENQ_REQUEST))?;
            let tests = tokio::task::spawn_blocking(enq_request)
                .await
                .map_err(|e| SessionError::CallbackFailed(e.to_string()))?;
            tracing::info!("Submitting inventory of {} tests", tests.len());
            self.send(OutboundEvent::Enq { tests }).await?;
        }

        if reply.is_running() {
            tracing::debug!("Run already in progress, requesting work");
            self.send(OutboundEvent::DeqRequest).await?;
        }

        self.transition(SessionState::Active);
        Ok(())
    }

    /// Run a batch in its own task and report the results from there
    fn dispatch_batch(&mut self, batch: TestBatch) {
        self.batches += 1;
        let number = self.batches;
        tracing::info!("Running batch {} ({} tests)", number, batch.len());

        let deq = Arc::clone(&self.deq);
        let writer = Arc::clone(&self.writer);
        self.pending.spawn(async move {
            let results = tokio::task::spawn_blocking(move || deq(batch))
                .await
                .map_err(|e| SessionError::CallbackFailed(e.to_string()))?;

            tracing::debug!("Reporting {} results for batch {}", results.len(), number);
            writer
                .lock()
                .await
                .send(OutboundEvent::Report(results))
                .await?;
            Ok(())
        });
    }

    /// Wait for every in-flight report before leaving
    async fn drain_reports(&mut self) -> Result<(), FciError> {
        if !self.pending.is_empty() {
            tracing::debug!("Waiting for {} pending result reports", self.pending.len());
        }

        while let Some(joined) = self.pending.join_next().await {
            if let Err(e) = reap(joined) {
                self.pending.shutdown().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn send(&mut self, event: OutboundEvent) -> Result<u64, FciError> {
        self.writer.lock().await.send(event).await
    }

    fn warn_if_not_joined(&self, event: &str) {
        if self.node_index.is_none() {
            tracing::warn!("Received '{}' before join", event);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!("Session {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Unwrap the outcome of a finished report task
fn reap(joined: Result<ReportResult, JoinError>) -> ReportResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(SessionError::CallbackFailed(e.to_string()).into()),
    }
}

/// Next heartbeat tick; never resolves when heartbeats are disabled
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

//! Relay state machine: drives one streaming completion and writes its
//! output to the client as framed events.
//!
//! ```text
//! Idle → Connecting → Streaming → { Completed | Failed | Aborted }
//! ```
//!
//! The client side is the sending half of a bounded channel whose receiver
//! backs the HTTP response body. When the client goes away the body, and
//! with it the receiver, is dropped, so the next write fails and the relay
//! aborts the backend stream. Exactly one terminal state is reached.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{Chunk, ChunkControl, ChunkHandler, CompletionService, StreamOutcome};
use crate::prompt::Message;
use crate::relay::event::{Framing, StreamEvent};

/// Lifecycle of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Aborted,
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::Completed | RelayState::Failed | RelayState::Aborted
        )
    }
}

/// Summary of a finished relay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub state: RelayState,
    /// Chunks received from the backend.
    pub chunks: usize,
    /// Events successfully handed to the client.
    pub events: usize,
}

/// The client is gone.
#[derive(Debug)]
struct Disconnected;

/// Chunk handler that frames chunks and writes them to the client.
struct RelayWriter {
    tx: mpsc::Sender<StreamEvent>,
    framing: Framing,
    state: RelayState,
    chunks: usize,
    events: usize,
}

impl RelayWriter {
    fn new(tx: mpsc::Sender<StreamEvent>, framing: Framing) -> Self {
        Self {
            tx,
            framing,
            state: RelayState::Idle,
            chunks: 0,
            events: 0,
        }
    }

    async fn write(&mut self, event: StreamEvent) -> Result<(), Disconnected> {
        if self.tx.send(event).await.is_err() {
            self.state = RelayState::Aborted;
            return Err(Disconnected);
        }
        self.events += 1;
        Ok(())
    }

    fn report(&self) -> RelayReport {
        RelayReport {
            state: self.state,
            chunks: self.chunks,
            events: self.events,
        }
    }
}

#[async_trait]
impl ChunkHandler for RelayWriter {
    async fn on_chunk(&mut self, chunk: Chunk) -> ChunkControl {
        if self.state == RelayState::Aborted {
            return ChunkControl::Abort;
        }
        self.state = RelayState::Streaming;
        self.chunks += 1;

        for event in self.framing.frame(&chunk) {
            if self.write(event).await.is_err() {
                return ChunkControl::Abort;
            }
        }
        ChunkControl::Continue
    }
}

/// Relays streaming completions from one backend service.
#[derive(Clone)]
pub struct StreamRelay {
    service: Arc<dyn CompletionService>,
    framing: Framing,
    capacity: usize,
}

impl StreamRelay {
    pub fn new(service: Arc<dyn CompletionService>, framing: Framing, capacity: usize) -> Self {
        Self {
            service,
            framing,
            capacity: capacity.max(1),
        }
    }

    pub fn service(&self) -> &Arc<dyn CompletionService> {
        &self.service
    }

    /// Start relaying on a background task.
    ///
    /// Returns the receiving end of the event stream, which the caller turns
    /// into the response body, and the task handle yielding the final report.
    /// If the relay task panics, the client still gets one `error` event
    /// before the stream closes.
    pub fn spawn(
        &self,
        request_id: String,
        messages: Vec<Message>,
    ) -> (mpsc::Receiver<StreamEvent>, JoinHandle<RelayReport>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let relay = self.clone();
        let fallback = tx.clone();

        let handle = tokio::spawn(async move {
            let run = tokio::spawn({
                let request_id = request_id.clone();
                async move { relay.run(&request_id, &messages, tx).await }
            });
            match run.await {
                Ok(report) => report,
                Err(e) => {
                    error!(request_id = %request_id, "Relay task failed: {e}");
                    let event = StreamEvent::error("internal relay failure");
                    let state = match fallback.send(event).await {
                        Ok(()) => RelayState::Failed,
                        Err(_) => RelayState::Aborted,
                    };
                    RelayReport {
                        state,
                        chunks: 0,
                        events: 0,
                    }
                }
            }
        });
        (rx, handle)
    }

    /// Run one stream to its terminal state.
    pub async fn run(
        &self,
        request_id: &str,
        messages: &[Message],
        tx: mpsc::Sender<StreamEvent>,
    ) -> RelayReport {
        let mut writer = RelayWriter::new(tx, self.framing);

        if writer.tx.is_closed() {
            debug!(request_id, "Client gone before the backend was contacted");
            writer.state = RelayState::Aborted;
            return writer.report();
        }

        writer.state = RelayState::Connecting;
        info!(
            request_id,
            model = self.service.model(),
            messages = messages.len(),
            "Opening backend stream"
        );

        match self.service.stream(messages, &mut writer).await {
            // A handler abort always wins over whatever the service reports.
            _ if writer.state == RelayState::Aborted => {}
            StreamOutcome::Aborted => writer.state = RelayState::Aborted,
            StreamOutcome::Completed(result) => {
                let finished = match result.function_call {
                    Some(call) => {
                        debug!(request_id, function = %call.name, "Completion ended in a function call");
                        writer.write(StreamEvent::function_call(&call)).await
                    }
                    None => Ok(()),
                };
                if finished.is_ok() {
                    writer.state = RelayState::Completed;
                }
            }
            StreamOutcome::Failed(e) => {
                warn!(
                    request_id,
                    after_chunks = writer.chunks,
                    "Backend stream failed: {e}"
                );
                if writer.write(StreamEvent::error(e.to_string())).await.is_ok() {
                    writer.state = RelayState::Failed;
                }
            }
        }

        let report = writer.report();
        match report.state {
            RelayState::Aborted => debug!(
                request_id,
                chunks = report.chunks,
                events = report.events,
                "Client disconnected, stream aborted"
            ),
            state => info!(
                request_id,
                state = ?state,
                chunks = report.chunks,
                events = report.events,
                "Stream finished"
            ),
        }
        report
    }
}

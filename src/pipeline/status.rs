//! Status observer.

use std::sync::Arc;

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::state::RunPhase;
use super::types::Counters;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// One progress report.
///
/// `skipped` is skipped and errored combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed: u64,
    pub skipped: u64,
    pub done: bool,
    pub phase: RunPhase,
}

impl StatusUpdate {
    pub fn new(phase: RunPhase, counters: Counters) -> Self {
        Self {
            message: None,
            error: None,
            completed: counters.completed,
            skipped: counters.skipped_plus_errored(),
            done: false,
            phase,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Receives status updates. Best effort: implementations must not block.
pub trait StatusSink: Send + Sync {
    fn emit(&self, update: StatusUpdate);

    /// Ask the user to fill in missing configuration.
    fn request_configuration(&self, _missing: &str) {}
}

/// What a [`BroadcastStatus`] subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Update(StatusUpdate),
    ConfigurationRequested { missing: String },
}

/// Fans status out to any number of subscribers.
pub struct BroadcastStatus {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastStatus {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream. Lagged receivers skip what they missed.
    pub fn stream(&self) -> impl Stream<Item = StatusEvent> + Send + 'static {
        futures::stream::unfold(self.tx.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Status subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl StatusSink for BroadcastStatus {
    fn emit(&self, update: StatusUpdate) {
        // Ok if nobody is listening
        let _ = self.tx.send(StatusEvent::Update(update));
    }

    fn request_configuration(&self, missing: &str) {
        let _ = self.tx.send(StatusEvent::ConfigurationRequested {
            missing: missing.to_string(),
        });
    }
}

//! Orchestrator inbox.
//!
//! Everything the orchestrator reacts to is an [`Event`] on one unbounded
//! channel: commands from the handle, results of the calls it spawned, and
//! whatever the catalog and the worker contexts report on their own.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::Discovery;
use crate::error::{CatalogError, ContextError, GenerationError, RunError};
use crate::worker::context::ContextHandle;
use crate::worker::provider::TaskReport;

use super::timeout::Deadline;
use super::types::{CatalogRef, ContextId, StopReason};

/// Run control.
#[derive(Debug)]
pub enum Command {
    Start {
        catalog: CatalogRef,
        reply: oneshot::Sender<Result<(), RunError>>,
    },
    Stop {
        reason: StopReason,
        reply: Option<oneshot::Sender<()>>,
    },
    /// Leave the event loop.
    Shutdown,
}

/// Spontaneous reports from the catalog context.
///
/// Delivered as [`Event::Catalog`] together with the [`CatalogRef`] they
/// concern; signals for any other catalog than the run's are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSignal {
    /// Every item of the current page was handed over.
    PageProcessed { has_more: bool },
    NoMorePages,
    RuntimeError { location: String, message: String },
    /// The catalog context went away.
    Closed,
}

#[derive(Debug)]
pub enum Event {
    Command(Command),
    /// Result of a scan or page advance spawned for run `run`.
    /// `Ok(None)` means the catalog has no further page.
    CatalogResult {
        run: Uuid,
        result: Result<Option<Discovery>, CatalogError>,
    },
    Catalog {
        catalog: CatalogRef,
        signal: CatalogSignal,
    },
    ContextOpened {
        context: ContextId,
        result: Result<ContextHandle, ContextError>,
    },
    RelayAccepted {
        context: ContextId,
        request: &'static str,
    },
    RelayFailed {
        context: ContextId,
        request: &'static str,
        error: ContextError,
    },
    TaskReport {
        context: ContextId,
        report: TaskReport,
    },
    Generated {
        context: ContextId,
        result: Result<String, GenerationError>,
    },
    DeadlineElapsed(Deadline),
    /// A worker context was closed out-of-band.
    ContextClosed { context: ContextId },
}

impl Event {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command(Command::Start { .. }) => "start",
            Self::Command(Command::Stop { .. }) => "stop",
            Self::Command(Command::Shutdown) => "shutdown",
            Self::CatalogResult { .. } => "catalog_result",
            Self::Catalog { .. } => "catalog_signal",
            Self::ContextOpened { .. } => "context_opened",
            Self::RelayAccepted { .. } => "relay_accepted",
            Self::RelayFailed { .. } => "relay_failed",
            Self::TaskReport { .. } => "task_report",
            Self::Generated { .. } => "generated",
            Self::DeadlineElapsed(_) => "deadline_elapsed",
            Self::ContextClosed { .. } => "context_closed",
        }
    }
}

/// Cloneable sender into the orchestrator inbox.
///
/// Handed to collaborators so they can report asynchronously. Sending after
/// the orchestrator exited is a no-op.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) -> bool {
        let label = event.label();
        if self.tx.send(event).is_err() {
            debug!(event = label, "Orchestrator inbox closed, dropping event");
            return false;
        }
        true
    }

    pub fn report(&self, context: ContextId, report: TaskReport) -> bool {
        self.send(Event::TaskReport { context, report })
    }

    pub fn context_closed(&self, context: ContextId) -> bool {
        self.send(Event::ContextClosed { context })
    }

    pub fn catalog(&self, catalog: CatalogRef, signal: CatalogSignal) -> bool {
        self.send(Event::Catalog { catalog, signal })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create the orchestrator inbox.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SubmissionOutcome;

    #[tokio::test]
    async fn sender_delivers_in_order() {
        let (tx, mut rx) = channel();
        tx.report(ContextId(1), TaskReport::Submitted(SubmissionOutcome::Success));
        tx.context_closed(ContextId(1));

        assert_eq!(rx.recv().await.unwrap().label(), "task_report");
        assert_eq!(rx.recv().await.unwrap().label(), "context_closed");
    }

    #[test]
    fn send_after_receiver_dropped_is_a_noop() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.catalog(CatalogRef("search".into()), CatalogSignal::NoMorePages));
    }
}

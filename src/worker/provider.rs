//! Contract of the external worker-context provider and its task runner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::pipeline::types::{ContextId, ExtractionOutcome, Item, SubmissionOutcome};

/// A request relayed to the task runner inside a worker context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Extract the item description.
    Extract { item_url: String },
    /// Fill in and submit the generated text.
    Submit { item_url: String, text: String },
}

impl TaskRequest {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Extract { .. } => "extract",
            Self::Submit { .. } => "submit",
        }
    }
}

/// What the task runner reports back, asynchronously, through the event
/// sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskReport {
    Extracted(ExtractionOutcome),
    Submitted(SubmissionOutcome),
    /// Spontaneous failure inside the context.
    RuntimeError { location: String, message: String },
}

/// Creates, drives and destroys isolated worker contexts.
///
/// `open` returns only once the context's task runner confirmed it is ready.
/// Requests sent before readiness are the provider's to reject. Reports for a
/// context must be tagged with the `ContextId` it was opened under.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, context: ContextId, item: &Item) -> Result<(), ContextError>;

    /// Deliver a request. `Ok` only acknowledges delivery; the outcome
    /// arrives later as a `TaskReport`.
    async fn send(&self, context: ContextId, request: TaskRequest) -> Result<(), ContextError>;

    async fn close(&self, context: ContextId) -> Result<(), ContextError>;
}

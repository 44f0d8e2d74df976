//! Item pipeline.
//!
//! Items discovered in the catalog are queued and processed one at a time:
//! 1. open a worker context for the item
//! 2. have the in-context runner extract the item description
//! 3. generate the submission text (`GenerationClient`)
//! 4. relay the text for submission and wait for the outcome
//!
//! Every step is bounded by the `TimeoutGuard`. A failed or late step costs
//! the item, never the run; only catalog failures end a run early.

pub mod counters;
pub mod events;
pub mod generation;
pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod status;
pub mod timeout;
pub mod types;

pub use events::{CatalogSignal, EventSender};
pub use generation::{GenerationClient, ProviderFactory, default_provider_factory};
pub use orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorHandle};
pub use state::RunPhase;
pub use status::{BroadcastStatus, StatusEvent, StatusSink, StatusUpdate};
pub use types::{CatalogRef, ContextId, Counters, ExtractionOutcome, Item, StopReason, SubmissionOutcome};

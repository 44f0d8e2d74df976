//! Worker contexts: isolated environments opened per item.
//!
//! - `provider`: what an external context provider must implement
//! - `context`: `WorkerContextManager`, which keeps at most one tracked

pub mod context;
pub mod provider;

pub use context::{ContextHandle, WorkerContextManager};
pub use provider::{ContextProvider, TaskReport, TaskRequest};

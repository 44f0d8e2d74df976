//! Error types for autopilot.

use std::time::Duration;

use crate::pipeline::state::RunPhase;
use crate::pipeline::types::ContextId;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by run control (start/stop).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("A run is already in progress (phase: {phase})")]
    AlreadyRunning { phase: RunPhase },

    #[error("Cannot start: {missing} not configured")]
    ConfigMissing { missing: String },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    #[error("Orchestrator is no longer running")]
    Shutdown,
}

/// Worker context errors, as surfaced by the context provider.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to open worker context for {item}: {reason}")]
    OpenFailed { item: String, reason: String },

    #[error("Relay to context {context} failed: {reason}")]
    RelayFailed { context: ContextId, reason: String },

    #[error("Context {active} is still open, cannot open {requested}")]
    AlreadyOpen {
        active: ContextId,
        requested: ContextId,
    },

    #[error("Context {context} was abandoned before it finished opening")]
    Abandoned { context: ContextId },
}

/// Catalog producer errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog scan failed: {0}")]
    ScanFailed(String),

    #[error("Catalog page advance failed: {0}")]
    AdvanceFailed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned {status}: {message}")]
    ServiceError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Malformed response from {provider}: {reason}")]
    MalformedResponse { provider: String, reason: String },
}

/// Errors from a single generation call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Generation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Item description is empty")]
    EmptyDescription,
}

/// Settings store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

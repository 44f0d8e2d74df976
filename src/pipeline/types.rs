//! Shared types for the item pipeline.

use serde::{Deserialize, Serialize};

// ── Items ───────────────────────────────────────────────────────────

/// One discovered unit of work.
///
/// The id is the item's url; it is unique within a catalog page but the same
/// url may be discovered again on a later page and is then queued twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Item {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            url,
            title: title.into(),
            description: None,
        }
    }

    /// Title for status messages, falling back to the url.
    pub fn label(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Opaque reference to the catalog context a run scans (e.g. a browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRef(pub String);

impl std::fmt::Display for CatalogRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket for the worker context opened for one dequeued item.
///
/// Every item-scoped event carries the ticket it was produced for and is
/// dropped unless it matches the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// What a deadline, runtime error, or closure notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "context", rename_all = "snake_case")]
pub enum Subject {
    /// The catalog/search context of the run.
    Catalog,
    /// The worker context of one item.
    Item(ContextId),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalog => f.write_str("catalog"),
            Self::Item(id) => write!(f, "{id}"),
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Result of the in-context extraction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Description text extracted; the item proceeds to generation.
    Described(String),
    /// The item is explicitly handled elsewhere (counts as skipped).
    Skipped(String),
    /// Extraction did not work (counts as errored).
    Failed(String),
}

impl ExtractionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Described(_) => "described",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of the in-context submission step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Success,
    Failure(String),
}

// ── Counters ────────────────────────────────────────────────────────

/// Running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub completed: u64,
    pub skipped: u64,
    pub errored: u64,
}

impl Counters {
    /// Skipped and errored, as the observer reports them.
    pub fn skipped_plus_errored(&self) -> u64 {
        self.skipped + self.errored
    }

    pub fn total(&self) -> u64 {
        self.completed + self.skipped + self.errored
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Completed,
    Skipped,
    Errored,
}

// ── Stop reasons ────────────────────────────────────────────────────

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The user asked.
    UserRequest,
    /// Queue empty and the catalog has no more pages.
    Exhausted,
    /// A catalog-scope step missed its deadline.
    Timeout,
    /// The catalog context disappeared.
    ClosedExternally,
    /// The catalog failed or reported a runtime error.
    CatalogError,
    /// Stop but keep the current item's context attached for inspection.
    Inspect,
}

impl StopReason {
    /// Whether stopping keeps the current item and its context.
    pub fn preserves_context(&self) -> bool {
        matches!(self, Self::Inspect)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::Exhausted => "exhausted",
            Self::Timeout => "timeout",
            Self::ClosedExternally => "closed_externally",
            Self::CatalogError => "catalog_error",
            Self::Inspect => "inspect",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_is_url() {
        let item = Item::new("https://example.com/jobs/1.html", "Backend engineer");
        assert_eq!(item.id, item.url);
        assert_eq!(item.label(), "Backend engineer");
    }

    #[test]
    fn item_label_falls_back_to_url() {
        let item = Item::new("https://example.com/jobs/2.html", "  ");
        assert_eq!(item.label(), "https://example.com/jobs/2.html");
    }

    #[test]
    fn counters_combine_skipped_and_errored() {
        let counters = Counters {
            completed: 3,
            skipped: 2,
            errored: 1,
        };
        assert_eq!(counters.skipped_plus_errored(), 3);
        assert_eq!(counters.total(), 6);
    }

    #[test]
    fn only_inspect_preserves_context() {
        assert!(StopReason::Inspect.preserves_context());
        assert!(!StopReason::UserRequest.preserves_context());
        assert!(!StopReason::Timeout.preserves_context());
    }

    #[test]
    fn extraction_outcome_serde_shape() {
        let json = serde_json::to_value(ExtractionOutcome::Skipped("external".into())).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["detail"], "external");
    }
}

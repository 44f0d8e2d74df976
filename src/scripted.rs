//! Scripted catalog and worker contexts, driven by a JSON fixture.
//!
//! Used for dry runs of the binary and by the integration tests. Each fixture
//! item says how its context behaves when opened, asked to extract, and asked
//! to submit. Reports flow back through the orchestrator's event sender just
//! as a real provider's would.
//!
//! ```json
//! {
//!   "catalog": "search",
//!   "pages": [
//!     { "items": [
//!       { "url": "https://example.com/jobs/1", "title": "Backend engineer",
//!         "extract": { "described": "We build payment systems in Rust." },
//!         "submit": "success" },
//!       { "url": "https://example.com/jobs/2", "title": "SRE",
//!         "extract": { "skipped": "external" } }
//!     ] }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, Discovery};
use crate::error::{CatalogError, ConfigError, ContextError};
use crate::pipeline::events::{CatalogSignal, EventSender};
use crate::pipeline::types::{
    CatalogRef, ContextId, ExtractionOutcome, Item, SubmissionOutcome,
};
use crate::worker::provider::{ContextProvider, TaskReport, TaskRequest};

/// How opening the item's context goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenScript {
    #[default]
    Ready,
    Fail(String),
    /// Never becomes ready.
    Hang,
}

/// What the runner does when asked to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractScript {
    Described(String),
    Skipped(String),
    Failed(String),
    RuntimeError(String),
    /// The context disappears instead of answering.
    CloseContext,
    /// No answer at all.
    Silent,
}

impl Default for ExtractScript {
    fn default() -> Self {
        Self::Described("Scripted item description.".to_string())
    }
}

/// What the runner does when asked to submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitScript {
    #[default]
    Success,
    Failure(String),
    /// The request is refused at delivery.
    RejectRelay,
    Silent,
}

/// How a catalog scan or page advance goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanScript {
    #[default]
    Ok,
    Fail(String),
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedItem {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub open: OpenScript,
    #[serde(default)]
    pub extract: ExtractScript,
    #[serde(default)]
    pub submit: SubmitScript,
    /// Delay before each answer from this item's context.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptedItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            open: OpenScript::default(),
            extract: ExtractScript::default(),
            submit: SubmitScript::default(),
            delay_ms: 0,
        }
    }

    pub fn with_open(mut self, open: OpenScript) -> Self {
        self.open = open;
        self
    }

    pub fn with_extract(mut self, extract: ExtractScript) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_submit(mut self, submit: SubmitScript) -> Self {
        self.submit = submit;
        self
    }

    fn item(&self) -> Item {
        Item::new(self.url.clone(), self.title.clone())
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedPage {
    #[serde(default)]
    pub items: Vec<ScriptedItem>,
}

/// A whole scripted catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_catalog")]
    pub catalog: String,
    #[serde(default)]
    pub pages: Vec<ScriptedPage>,
    #[serde(default)]
    pub scan: ScanScript,
}

fn default_catalog() -> String {
    "scripted".to_string()
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
            key: "fixture".into(),
            message: e.to_string(),
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn catalog_ref(&self) -> CatalogRef {
        CatalogRef(self.catalog.clone())
    }

    /// Build the catalog and context provider. Both report through `events`.
    pub fn build(&self, events: EventSender) -> (Arc<ScriptedCatalog>, Arc<ScriptedContexts>) {
        let catalog = Arc::new(ScriptedCatalog {
            catalog: self.catalog_ref(),
            pages: self.pages.clone(),
            scan: self.scan.clone(),
            cursor: Mutex::new(0),
            events: events.clone(),
        });
        let scripts = self
            .pages
            .iter()
            .flat_map(|p| p.items.iter())
            .fold(HashMap::new(), |mut acc, item| {
                acc.entry(item.url.clone()).or_insert_with(|| item.clone());
                acc
            });
        let contexts = Arc::new(ScriptedContexts {
            scripts,
            events,
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
        });
        (catalog, contexts)
    }
}

/// Serves fixture pages in order.
pub struct ScriptedCatalog {
    catalog: CatalogRef,
    pages: Vec<ScriptedPage>,
    scan: ScanScript,
    cursor: Mutex<usize>,
    events: EventSender,
}

impl ScriptedCatalog {
    fn page(&self, index: usize) -> Discovery {
        let items = self
            .pages
            .get(index)
            .map(|p| p.items.iter().map(ScriptedItem::item).collect())
            .unwrap_or_default();
        Discovery {
            items,
            has_more: index + 1 < self.pages.len(),
        }
    }

    async fn serve(&self, index: usize) -> Result<Discovery, String> {
        match &self.scan {
            ScanScript::Ok => {}
            ScanScript::Fail(reason) => return Err(reason.clone()),
            ScanScript::Hang => std::future::pending::<()>().await,
        }
        Ok(self.page(index))
    }

    /// Report the catalog context as gone.
    pub fn close(&self) {
        self.events.catalog(self.catalog.clone(), CatalogSignal::Closed);
    }
}

#[async_trait]
impl Catalog for ScriptedCatalog {
    async fn scan(&self, catalog: &CatalogRef) -> Result<Discovery, CatalogError> {
        let index = *lock(&self.cursor);
        debug!(catalog = %catalog, page = index, "Scripted scan");
        self.serve(index).await.map_err(CatalogError::ScanFailed)
    }

    async fn advance_page(&self, catalog: &CatalogRef) -> Result<Option<Discovery>, CatalogError> {
        let index = {
            let mut cursor = lock(&self.cursor);
            *cursor += 1;
            *cursor
        };
        debug!(catalog = %catalog, page = index, "Scripted page advance");
        if index >= self.pages.len() {
            return Ok(None);
        }
        self.serve(index).await.map(Some).map_err(CatalogError::AdvanceFailed)
    }
}

/// Worker contexts whose runners follow the fixture.
pub struct ScriptedContexts {
    scripts: HashMap<String, ScriptedItem>,
    events: EventSender,
    open: Mutex<HashMap<ContextId, String>>,
    closed: Mutex<HashSet<ContextId>>,
}

impl ScriptedContexts {
    fn script_for(&self, context: ContextId) -> Result<ScriptedItem, ContextError> {
        let url = lock(&self.open).get(&context).cloned();
        url.and_then(|url| self.scripts.get(&url).cloned())
            .ok_or_else(|| ContextError::RelayFailed {
                context,
                reason: "no such context".into(),
            })
    }

    /// Contexts opened and not closed, in ticket order.
    pub fn open_contexts(&self) -> Vec<ContextId> {
        let closed = lock(&self.closed);
        let mut open: Vec<_> = lock(&self.open)
            .keys()
            .filter(|c| !closed.contains(c))
            .copied()
            .collect();
        open.sort();
        open
    }

    pub fn closed_contexts(&self) -> Vec<ContextId> {
        let mut closed: Vec<_> = lock(&self.closed).iter().copied().collect();
        closed.sort();
        closed
    }

    fn answer_later(&self, context: ContextId, delay: Duration, answer: Answer) {
        let events = self.events.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match answer {
                Answer::Report(report) => events.report(context, report),
                Answer::Closed => events.context_closed(context),
            };
        });
    }
}

enum Answer {
    Report(TaskReport),
    Closed,
}

#[async_trait]
impl ContextProvider for ScriptedContexts {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, context: ContextId, item: &Item) -> Result<(), ContextError> {
        let script = self
            .scripts
            .get(&item.url)
            .cloned()
            .unwrap_or_else(|| ScriptedItem::new(item.url.clone(), item.title.clone()));

        if !script.delay().is_zero() {
            tokio::time::sleep(script.delay()).await;
        }
        match script.open {
            OpenScript::Ready => {
                lock(&self.open).insert(context, item.url.clone());
                Ok(())
            }
            OpenScript::Fail(reason) => Err(ContextError::OpenFailed {
                item: item.url.clone(),
                reason,
            }),
            OpenScript::Hang => std::future::pending().await,
        }
    }

    async fn send(&self, context: ContextId, request: TaskRequest) -> Result<(), ContextError> {
        if lock(&self.closed).contains(&context) {
            return Err(ContextError::RelayFailed {
                context,
                reason: "context is closed".into(),
            });
        }
        let script = self.script_for(context)?;
        let delay = script.delay();

        match request {
            TaskRequest::Extract { .. } => {
                let answer = match script.extract {
                    ExtractScript::Described(text) => {
                        Answer::Report(TaskReport::Extracted(ExtractionOutcome::Described(text)))
                    }
                    ExtractScript::Skipped(reason) => {
                        Answer::Report(TaskReport::Extracted(ExtractionOutcome::Skipped(reason)))
                    }
                    ExtractScript::Failed(reason) => {
                        Answer::Report(TaskReport::Extracted(ExtractionOutcome::Failed(reason)))
                    }
                    ExtractScript::RuntimeError(message) => Answer::Report(TaskReport::RuntimeError {
                        location: "extract".into(),
                        message,
                    }),
                    ExtractScript::CloseContext => {
                        lock(&self.closed).insert(context);
                        Answer::Closed
                    }
                    ExtractScript::Silent => return Ok(()),
                };
                self.answer_later(context, delay, answer);
            }
            TaskRequest::Submit { .. } => {
                let answer = match script.submit {
                    SubmitScript::Success => TaskReport::Submitted(SubmissionOutcome::Success),
                    SubmitScript::Failure(reason) => {
                        TaskReport::Submitted(SubmissionOutcome::Failure(reason))
                    }
                    SubmitScript::RejectRelay => {
                        return Err(ContextError::RelayFailed {
                            context,
                            reason: "submission refused".into(),
                        });
                    }
                    SubmitScript::Silent => return Ok(()),
                };
                self.answer_later(context, delay, Answer::Report(answer));
            }
        }
        Ok(())
    }

    async fn close(&self, context: ContextId) -> Result<(), ContextError> {
        lock(&self.closed).insert(context);
        debug!(context = %context, "Scripted context closed");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::{self, Event};

    const FIXTURE: &str = r#"{
        "catalog": "search",
        "pages": [
            { "items": [
                { "url": "https://example.com/1", "title": "One",
                  "extract": { "described": "Rust backend" }, "submit": "success" },
                { "url": "https://example.com/2", "title": "Two",
                  "extract": { "skipped": "external" } }
            ] },
            { "items": [
                { "url": "https://example.com/3", "open": { "fail": "404" } }
            ] }
        ]
    }"#;

    #[test]
    fn fixture_parses() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        assert_eq!(fixture.catalog_ref(), CatalogRef("search".into()));
        assert_eq!(fixture.pages.len(), 2);
        let first = &fixture.pages[0].items[0];
        assert_eq!(first.extract, ExtractScript::Described("Rust backend".into()));
        assert_eq!(first.submit, SubmitScript::Success);
        assert_eq!(fixture.pages[1].items[0].open, OpenScript::Fail("404".into()));
        assert_eq!(fixture.pages[1].items[0].extract, ExtractScript::default());
    }

    #[test]
    fn bad_fixture_is_a_config_error() {
        assert!(matches!(
            Fixture::from_json("{\"pages\": 3}"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn catalog_pages_in_order() {
        let (events, _rx) = events::channel();
        let (catalog, _) = Fixture::from_json(FIXTURE).unwrap().build(events);
        let tab = CatalogRef("search".into());

        let first = catalog.scan(&tab).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let second = catalog.advance_page(&tab).await.unwrap().unwrap();
        assert_eq!(second.items[0].url, "https://example.com/3");
        assert!(!second.has_more);

        assert!(catalog.advance_page(&tab).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contexts_report_through_events() {
        let (events, mut rx) = events::channel();
        let (_, contexts) = Fixture::from_json(FIXTURE).unwrap().build(events);
        let item = Item::new("https://example.com/2", "Two");

        contexts.open(ContextId(1), &item).await.unwrap();
        contexts
            .send(
                ContextId(1),
                TaskRequest::Extract {
                    item_url: item.url.clone(),
                },
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Event::TaskReport { context, report } => {
                assert_eq!(context, ContextId(1));
                assert_eq!(
                    report,
                    TaskReport::Extracted(ExtractionOutcome::Skipped("external".into()))
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(contexts.open_contexts(), vec![ContextId(1)]);

        let failing = Item::new("https://example.com/3", "");
        assert!(contexts.open(ContextId(2), &failing).await.is_err());
        assert!(contexts.send(ContextId(9), TaskRequest::Extract { item_url: "x".into() }).await.is_err());
    }
}

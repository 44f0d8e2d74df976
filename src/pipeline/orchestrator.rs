//! The orchestrator. One run, one item at a time.
//!
//! A single task owns the run state, the counters and the watchdog and reacts
//! to one [`Event`] at a time. Every external call (catalog scan, context open,
//! relay, generation) runs on its own task and comes back as an event tagged
//! with the run id or the item's [`ContextId`]. Anything that does not match
//! the current run and item is dropped, which is what makes late completions
//! after a timeout or an abandonment harmless.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, Discovery};
use crate::config::RunConfig;
use crate::error::{CatalogError, ContextError, GenerationError, RunError};
use crate::llm::LlmConfig;
use crate::store::{Settings, SettingsPatch, SettingsStore};
use crate::worker::context::{ContextHandle, WorkerContextManager};
use crate::worker::provider::{TaskReport, TaskRequest};

use super::counters::CounterState;
use super::events::{CatalogSignal, Command, Event, EventReceiver, EventSender};
use super::generation::{GenerationClient, ProviderFactory};
use super::state::{CurrentItem, RunPhase, RunState};
use super::status::{StatusSink, StatusUpdate};
use super::timeout::{Deadline, TimeoutGuard};
use super::types::{
    CatalogRef, ContextId, CounterKind, Counters, ExtractionOutcome, StopReason, Subject,
    SubmissionOutcome,
};

/// Collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub catalog: Arc<dyn Catalog>,
    pub contexts: Arc<WorkerContextManager>,
    pub store: Arc<dyn SettingsStore>,
    pub status: Arc<dyn StatusSink>,
    /// Builds the generation backend from the credentials loaded at start.
    pub llm_factory: ProviderFactory,
}

/// Per-run values fixed at start.
struct ActiveRun {
    profile: String,
    generator: Arc<GenerationClient>,
}

pub struct Orchestrator {
    config: RunConfig,
    deps: OrchestratorDeps,
    state: RunState,
    counters: CounterState,
    guard: TimeoutGuard,
    events: EventSender,
    inbox: EventReceiver,
    persist_tx: mpsc::UnboundedSender<SettingsPatch>,
    persist_rx: Option<mpsc::UnboundedReceiver<SettingsPatch>>,
    run: Option<ActiveRun>,
}

impl Orchestrator {
    /// Create an orchestrator over an inbox made with
    /// [`events::channel`](super::events::channel). Collaborators that report
    /// asynchronously hold clones of the same sender.
    pub fn new(
        config: RunConfig,
        deps: OrchestratorDeps,
        (events, inbox): (EventSender, EventReceiver),
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();

        let counter_tx = persist_tx.clone();
        let counters = CounterState::new(Arc::new(move |counts: Counters| {
            let _ = counter_tx.send(SettingsPatch::counters(counts));
        }));

        let fire_tx = events.clone();
        let guard = TimeoutGuard::new(
            config.step_timeout,
            Arc::new(move |deadline: Deadline| {
                fire_tx.send(Event::DeadlineElapsed(deadline));
            }),
        );

        Self {
            config,
            deps,
            state: RunState::new(),
            counters,
            guard,
            events,
            inbox,
            persist_tx,
            persist_rx: Some(persist_rx),
            run: None,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            events: self.events.clone(),
        }
    }

    /// Run the event loop on its own task.
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Process events until shutdown.
    pub async fn run(mut self) {
        if let Some(rx) = self.persist_rx.take() {
            spawn_persister(Arc::clone(&self.deps.store), rx);
        }
        self.recover_interrupted_run().await;

        info!(step_timeout = ?self.config.step_timeout, "Orchestrator ready");
        while let Some(event) = self.inbox.recv().await {
            if matches!(event, Event::Command(Command::Shutdown)) {
                break;
            }
            self.dispatch(event).await;
        }

        self.guard.disarm();
        info!("Orchestrator shut down");
    }

    async fn dispatch(&mut self, event: Event) {
        debug!(event = event.label(), phase = %self.state.phase, "Handling event");
        match event {
            Event::Command(Command::Start { catalog, reply }) => {
                let result = self.start(catalog).await;
                let _ = reply.send(result);
            }
            Event::Command(Command::Stop { reason, reply }) => {
                self.stop(reason).await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Event::Command(Command::Shutdown) => {}
            Event::CatalogResult { run, result } => self.on_catalog_result(run, result).await,
            Event::Catalog { catalog, signal } => self.on_catalog_signal(catalog, signal).await,
            Event::ContextOpened { context, result } => self.on_context_opened(context, result).await,
            Event::RelayAccepted { context, request } => self.on_relay_accepted(context, request),
            Event::RelayFailed {
                context,
                request,
                error,
            } => {
                if self.state.is_current(context) {
                    self.finish_item(
                        CounterKind::Errored,
                        format!("Could not deliver {request} request: {error}"),
                    )
                    .await;
                } else {
                    debug!(context = %context, request, "Ignoring relay failure for stale context");
                }
            }
            Event::TaskReport { context, report } => self.on_task_report(context, report).await,
            Event::Generated { context, result } => self.on_generated(context, result).await,
            Event::DeadlineElapsed(deadline) => self.on_deadline(deadline).await,
            Event::ContextClosed { context } => {
                if self.state.is_current(context) {
                    self.finish_item(CounterKind::Errored, "Worker context was closed".to_string())
                        .await;
                } else {
                    debug!(context = %context, "Ignoring closure of untracked context");
                }
            }
        }
    }

    // ── Run control ─────────────────────────────────────────────────

    async fn start(&mut self, catalog: CatalogRef) -> Result<(), RunError> {
        if self.state.running || !self.state.phase.is_startable() {
            warn!(phase = %self.state.phase, "Start requested while a run is in progress");
            return Err(RunError::AlreadyRunning {
                phase: self.state.phase,
            });
        }

        let settings = match self.deps.store.load().await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Failed to load settings");
                Settings::default()
            }
        };

        let credentials = match settings.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                if let RunError::ConfigMissing { missing } = &e {
                    self.deps.status.request_configuration(missing);
                }
                self.deps
                    .status
                    .emit(self.status().with_error(e.to_string()).finished());
                return Err(e);
            }
        };

        // Completed and skipped carry over between runs; errors do not.
        self.counters.restore(Counters {
            completed: settings.counters.completed,
            skipped: settings.counters.skipped,
            errored: 0,
        });

        let llm = (self.deps.llm_factory)(&LlmConfig::from_generation(
            &self.config.generation,
            credentials.api_key,
        ));
        self.run = Some(ActiveRun {
            profile: credentials.profile,
            generator: Arc::new(GenerationClient::new(
                llm,
                self.config.generation.clone(),
                self.config.step_timeout,
            )),
        });

        // A context kept for inspection by the previous run is let go.
        if let Some(previous) = self.state.clear_current() {
            self.deps.contexts.release(previous.context).await;
        }

        let run_id = self.state.begin(catalog.clone());
        self.persist(SettingsPatch {
            counters: Some(self.counters.snapshot()),
            running: Some(true),
            ..Default::default()
        });
        self.transition(RunPhase::ScanningCatalog, "run started");
        info!(run = %run_id, catalog = %catalog, "Run started");

        self.guard.arm(Subject::Catalog, "scan");
        self.state.catalog_pending = true;
        let source = Arc::clone(&self.deps.catalog);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = source.scan(&catalog).await.map(Some);
            events.send(Event::CatalogResult {
                run: run_id,
                result,
            });
        });

        self.deps
            .status
            .emit(self.status().with_message("Scanning the catalog"));
        Ok(())
    }

    async fn stop(&mut self, reason: StopReason) {
        if !self.state.running {
            debug!(reason = %reason, "Stop requested while not running");
            return;
        }

        self.guard.disarm();
        self.state.running = false;

        if !reason.preserves_context() {
            if let Some(current) = self.state.clear_current() {
                self.deps.contexts.release(current.context).await;
            }
        }
        let dropped = self.state.queue.clear();
        self.transition(RunPhase::Stopped, reason.as_str());
        self.persist(SettingsPatch::running(false));
        self.run = None;

        let counters = self.counters.snapshot();
        info!(
            reason = %reason,
            dropped,
            completed = counters.completed,
            skipped = counters.skipped,
            errored = counters.errored,
            "Run stopped"
        );

        let update = self.status().finished();
        let update = match reason {
            StopReason::UserRequest => update.with_message("Stopped"),
            StopReason::Exhausted => update.with_message("All items processed"),
            StopReason::Inspect => update.with_message("Stopped, current item kept for inspection"),
            StopReason::Timeout => update.with_error("The catalog did not respond in time"),
            StopReason::ClosedExternally => update.with_error("The catalog was closed"),
            StopReason::CatalogError => update.with_error("The catalog reported an error"),
        };
        self.deps.status.emit(update);
    }

    /// A crash or reload can leave `running=true` behind. Clear it and tell
    /// the user the run has to be restarted.
    async fn recover_interrupted_run(&mut self) {
        let settings = match self.deps.store.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Could not read settings at startup");
                return;
            }
        };
        self.counters.restore(settings.counters);

        if settings.running {
            warn!("Previous run was interrupted");
            if let Err(e) = self.deps.store.save(SettingsPatch::running(false)).await {
                warn!(error = %e, "Failed to clear interrupted run flag");
            }
            self.deps.status.emit(
                self.status()
                    .with_error("The previous run was interrupted. Start it again to continue.")
                    .finished(),
            );
        }
    }

    // ── Catalog ─────────────────────────────────────────────────────

    async fn on_catalog_result(
        &mut self,
        run: Uuid,
        result: Result<Option<Discovery>, CatalogError>,
    ) {
        if !self.state.running || self.state.run_id != Some(run) {
            debug!(run = %run, "Ignoring catalog result from a finished run");
            return;
        }
        self.state.catalog_pending = false;
        if self.guard.live().is_some_and(|d| d.subject == Subject::Catalog) {
            self.guard.disarm();
        }

        match result {
            Err(e) => {
                error!(error = %e, "Catalog failed");
                self.deps.status.emit(self.status().with_error(e.to_string()));
                self.stop(StopReason::CatalogError).await;
            }
            Ok(None) => {
                info!("Catalog has no further page");
                self.stop(StopReason::Exhausted).await;
            }
            Ok(Some(discovery)) => {
                let found = discovery.items.len();
                info!(found, has_more = discovery.has_more, "Catalog page discovered");
                self.state.catalog_has_more = Some(discovery.has_more);
                self.state.queue.enqueue_all(discovery.items);
                self.deps
                    .status
                    .emit(self.status().with_message(format!("Found {found} items")));
                self.drain().await;
            }
        }
    }

    async fn on_catalog_signal(&mut self, catalog: CatalogRef, signal: CatalogSignal) {
        if self.state.catalog.as_ref() != Some(&catalog) {
            debug!(catalog = %catalog, ?signal, "Ignoring signal from another catalog");
            return;
        }
        if !self.state.running {
            if let CatalogSignal::RuntimeError { location, message } = &signal {
                self.deps
                    .status
                    .emit(self.status().with_error(format!("{location}: {message}")));
            }
            debug!(?signal, "Ignoring catalog signal outside of a run");
            return;
        }

        match signal {
            CatalogSignal::PageProcessed { has_more } => {
                self.state.catalog_has_more = Some(has_more);
                if self.state.catalog_pending {
                    debug!(has_more, "Catalog call in flight, page signal only recorded");
                    return;
                }
                self.drain().await;
            }
            CatalogSignal::NoMorePages => self.stop(StopReason::Exhausted).await,
            CatalogSignal::RuntimeError { location, message } => {
                error!(location = %location, message = %message, "Catalog runtime error");
                self.deps
                    .status
                    .emit(self.status().with_error(format!("{location}: {message}")));
                self.stop(StopReason::CatalogError).await;
            }
            CatalogSignal::Closed => {
                warn!("Catalog context closed during the run");
                self.stop(StopReason::ClosedExternally).await;
            }
        }
    }

    /// Ask the catalog for its next page. At most one catalog call is in
    /// flight per run.
    fn advance_catalog(&mut self) {
        if self.state.catalog_pending {
            debug!("Catalog call already in flight");
            return;
        }
        let (Some(run_id), Some(catalog)) = (self.state.run_id, self.state.catalog.clone()) else {
            return;
        };
        if self.state.phase != RunPhase::AwaitingDiscovery {
            self.transition(RunPhase::AwaitingDiscovery, "advancing catalog page");
        }
        self.state.catalog_has_more = None;
        self.guard.arm(Subject::Catalog, "advance_page");
        self.state.catalog_pending = true;

        let source = Arc::clone(&self.deps.catalog);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = source.advance_page(&catalog).await;
            events.send(Event::CatalogResult {
                run: run_id,
                result,
            });
        });

        self.deps
            .status
            .emit(self.status().with_message("Moving to the next page"));
    }

    // ── Queue ───────────────────────────────────────────────────────

    /// Start the next item if nothing is in flight.
    async fn drain(&mut self) {
        if !self.state.running {
            if !self.state.queue.is_empty() {
                self.deps.status.emit(self.status().with_message(format!(
                    "Not running, {} items left in the queue",
                    self.state.queue.len()
                )));
            }
            return;
        }
        if self.state.current.is_some() {
            return;
        }

        let Some(item) = self.state.queue.dequeue_front() else {
            if self.state.catalog_pending {
                return;
            }
            match self.state.catalog_has_more {
                Some(true) => self.advance_catalog(),
                Some(false) => self.stop(StopReason::Exhausted).await,
                None => {
                    if self.state.phase != RunPhase::AwaitingDiscovery {
                        self.transition(RunPhase::AwaitingDiscovery, "queue empty");
                    }
                    self.guard.arm(Subject::Catalog, "await_discovery");
                }
            }
            return;
        };

        let context = self.state.next_context_id();
        self.transition(RunPhase::ItemOpening, item.url.as_str());
        info!(context = %context, url = %item.url, remaining = self.state.queue.len(), "Processing item");
        self.deps
            .status
            .emit(self.status().with_message(format!("Opening {}", item.label())));

        self.state.current = Some(CurrentItem {
            item: item.clone(),
            context,
            handle: None,
        });
        self.guard.arm(Subject::Item(context), "open");

        let contexts = Arc::clone(&self.deps.contexts);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = contexts.open(context, &item).await;
            events.send(Event::ContextOpened { context, result });
        });
    }

    // ── Item pipeline ───────────────────────────────────────────────

    async fn on_context_opened(
        &mut self,
        context: ContextId,
        result: Result<ContextHandle, ContextError>,
    ) {
        if !self.state.is_current(context) || self.state.phase != RunPhase::ItemOpening {
            debug!(context = %context, "Ignoring open result for stale context");
            return;
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                self.finish_item(CounterKind::Errored, format!("Could not open: {e}"))
                    .await;
                return;
            }
        };

        if let Some(current) = self.state.current.as_mut() {
            current.handle = Some(handle.clone());
        }
        self.transition(RunPhase::ItemExtracting, "context ready");
        self.guard.arm(Subject::Item(context), "extract");
        let request = TaskRequest::Extract {
            item_url: handle.item_url.clone(),
        };
        self.relay(handle, request);
    }

    fn on_relay_accepted(&mut self, context: ContextId, request: &'static str) {
        if !self.state.is_current(context) {
            return;
        }
        if request == "submit" && self.state.phase == RunPhase::ItemSubmitting {
            self.transition(RunPhase::ItemAwaitingResult, "submission delivered");
            self.guard.arm(Subject::Item(context), "await_result");
        }
    }

    async fn on_task_report(&mut self, context: ContextId, report: TaskReport) {
        if !self.state.is_current(context) {
            // Nothing to count, but the user may still want to know.
            if let TaskReport::RuntimeError { location, message } = &report {
                warn!(context = %context, location = %location, message = %message, "Runtime error in untracked context");
                self.deps
                    .status
                    .emit(self.status().with_error(format!("{location}: {message}")));
            } else {
                debug!(context = %context, ?report, "Ignoring report for stale context");
            }
            return;
        }

        match report {
            TaskReport::Extracted(outcome) => {
                if self.state.phase != RunPhase::ItemExtracting {
                    debug!(phase = %self.state.phase, "Ignoring extraction report outside extraction");
                    return;
                }
                match outcome {
                    ExtractionOutcome::Described(description) => {
                        self.generate(context, description).await
                    }
                    ExtractionOutcome::Skipped(reason) => {
                        self.finish_item(CounterKind::Skipped, format!("Skipped: {reason}"))
                            .await
                    }
                    ExtractionOutcome::Failed(reason) => {
                        self.finish_item(CounterKind::Errored, format!("Extraction failed: {reason}"))
                            .await
                    }
                }
            }
            TaskReport::Submitted(outcome) => {
                if !matches!(
                    self.state.phase,
                    RunPhase::ItemSubmitting | RunPhase::ItemAwaitingResult
                ) {
                    debug!(phase = %self.state.phase, "Ignoring submission report outside submission");
                    return;
                }
                match outcome {
                    SubmissionOutcome::Success => {
                        self.finish_item(CounterKind::Completed, "Submitted".to_string())
                            .await
                    }
                    SubmissionOutcome::Failure(reason) => {
                        self.finish_item(CounterKind::Errored, format!("Submission failed: {reason}"))
                            .await
                    }
                }
            }
            TaskReport::RuntimeError { location, message } => {
                self.finish_item(CounterKind::Errored, format!("{location}: {message}"))
                    .await
            }
        }
    }

    async fn generate(&mut self, context: ContextId, description: String) {
        let Some(run) = self.run.as_ref() else {
            self.finish_item(CounterKind::Errored, "No generation backend".to_string())
                .await;
            return;
        };
        let generator = Arc::clone(&run.generator);
        let profile = run.profile.clone();

        if let Some(current) = self.state.current.as_mut() {
            current.item.description = Some(description.clone());
        }
        self.transition(RunPhase::ItemGenerating, "description extracted");
        self.guard.arm(Subject::Item(context), "generate");
        self.deps
            .status
            .emit(self.status().with_message("Generating text"));

        let events = self.events.clone();
        tokio::spawn(async move {
            let result = generator.generate(&profile, &description).await;
            events.send(Event::Generated { context, result });
        });
    }

    async fn on_generated(&mut self, context: ContextId, result: Result<String, GenerationError>) {
        if !self.state.is_current(context) || self.state.phase != RunPhase::ItemGenerating {
            debug!(context = %context, "Ignoring late generation result");
            return;
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                self.finish_item(CounterKind::Errored, format!("Generation failed: {e}"))
                    .await;
                return;
            }
        };

        let Some(handle) = self.state.current.as_ref().and_then(|c| c.handle.clone()) else {
            self.finish_item(CounterKind::Errored, "Worker context is gone".to_string())
                .await;
            return;
        };

        self.transition(RunPhase::ItemSubmitting, "text generated");
        self.guard.arm(Subject::Item(context), "submit");
        let request = TaskRequest::Submit {
            item_url: handle.item_url.clone(),
            text,
        };
        self.relay(handle, request);
    }

    async fn on_deadline(&mut self, deadline: Deadline) {
        if !self.guard.take_if_live(&deadline) || !self.state.running {
            return;
        }

        warn!(subject = %deadline.subject, step = deadline.step, "Step deadline elapsed");
        match deadline.subject {
            Subject::Item(context) if self.state.is_current(context) => {
                self.finish_item(
                    CounterKind::Errored,
                    format!("Timed out during {}", deadline.step),
                )
                .await;
            }
            Subject::Item(_) => {}
            Subject::Catalog => self.stop(StopReason::Timeout).await,
        }
    }

    /// Count the current item's outcome, let go of it, and move on.
    ///
    /// The worker context is closed only after a successful submission;
    /// otherwise it stays open, untracked, for inspection.
    async fn finish_item(&mut self, kind: CounterKind, outcome: String) {
        self.guard.disarm();
        let Some(current) = self.state.clear_current() else {
            return;
        };
        let counters = self.counters.increment(kind);
        self.deps.contexts.release(current.context).await;

        if kind == CounterKind::Completed {
            let contexts = Arc::clone(&self.deps.contexts);
            let context = current.context;
            tokio::spawn(async move {
                if let Err(e) = contexts.close(context).await {
                    warn!(context = %context, error = %e, "Failed to close worker context");
                }
            });
        }

        let label = current.item.label().to_string();
        let update = self.status();
        let update = match kind {
            CounterKind::Completed => {
                info!(context = %current.context, url = %current.item.url, completed = counters.completed, "Item completed");
                update.with_message(format!("{label}: {outcome}"))
            }
            CounterKind::Skipped => {
                info!(context = %current.context, url = %current.item.url, outcome = %outcome, "Item skipped");
                update.with_message(format!("{label}: {outcome}"))
            }
            CounterKind::Errored => {
                warn!(context = %current.context, url = %current.item.url, error = %outcome, "Item abandoned");
                update.with_error(format!("{label}: {outcome}"))
            }
        };
        self.deps.status.emit(update);

        self.drain().await;
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn relay(&self, handle: ContextHandle, request: TaskRequest) {
        let contexts = Arc::clone(&self.deps.contexts);
        let events = self.events.clone();
        tokio::spawn(async move {
            let context = handle.id;
            let label = request.label();
            match contexts.relay(&handle, request).await {
                Ok(()) => events.send(Event::RelayAccepted {
                    context,
                    request: label,
                }),
                Err(error) => events.send(Event::RelayFailed {
                    context,
                    request: label,
                    error,
                }),
            };
        });
    }

    fn transition(&mut self, phase: RunPhase, reason: &str) {
        if let Err(e) = self.state.transition_to(phase, Some(reason.to_string())) {
            error!(error = %e, "Refusing phase transition");
        }
    }

    fn status(&self) -> StatusUpdate {
        StatusUpdate::new(self.state.phase, self.counters.snapshot())
    }

    fn persist(&self, patch: SettingsPatch) {
        let _ = self.persist_tx.send(patch);
    }
}

/// Apply settings writes in order, off the event loop.
fn spawn_persister(store: Arc<dyn SettingsStore>, mut rx: mpsc::UnboundedReceiver<SettingsPatch>) {
    tokio::spawn(async move {
        while let Some(patch) = rx.recv().await {
            if let Err(e) = store.save(patch).await {
                warn!(error = %e, "Failed to persist settings");
            }
        }
    });
}

/// Cloneable control surface of a running orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    events: EventSender,
}

impl OrchestratorHandle {
    /// Start a run over `catalog`.
    pub async fn start(&self, catalog: CatalogRef) -> Result<(), RunError> {
        let (reply, rx) = oneshot::channel();
        if !self
            .events
            .send(Event::Command(Command::Start { catalog, reply }))
        {
            return Err(RunError::Shutdown);
        }
        rx.await.map_err(|_| RunError::Shutdown)?
    }

    /// Stop the run. Stopping a run that is not running does nothing.
    pub async fn stop(&self, reason: StopReason) -> Result<(), RunError> {
        let (reply, rx) = oneshot::channel();
        if !self.events.send(Event::Command(Command::Stop {
            reason,
            reply: Some(reply),
        })) {
            return Err(RunError::Shutdown);
        }
        rx.await.map_err(|_| RunError::Shutdown)
    }

    pub fn shutdown(&self) {
        self.events.send(Event::Command(Command::Shutdown));
    }

    /// Sender for collaborators that report asynchronously.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }
}

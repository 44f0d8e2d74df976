//! Run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RunError;
use crate::worker::context::ContextHandle;

use super::queue::ItemQueue;
use super::types::{CatalogRef, ContextId, Item};

/// Maximum number of phase transitions kept in the history.
const MAX_TRANSITIONS: usize = 200;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing has run yet.
    Idle,
    /// Waiting for the catalog to report the items on the current page.
    ScanningCatalog,
    /// Queue is empty; waiting for the catalog to paginate or finish.
    AwaitingDiscovery,
    /// Opening a worker context for the current item.
    ItemOpening,
    /// Waiting for the in-context runner to extract the description.
    ItemExtracting,
    /// Waiting for the generation service.
    ItemGenerating,
    /// Handing the generated text to the worker context.
    ItemSubmitting,
    /// Waiting for the outcome of the submission.
    ItemAwaitingResult,
    /// Run is over.
    Stopped,
}

impl RunPhase {
    /// Check if this phase allows transitioning to another phase.
    pub fn can_transition_to(&self, target: RunPhase) -> bool {
        use RunPhase::*;

        if target == Stopped {
            return *self != Stopped;
        }

        matches!(
            (self, target),
            // Run start
            (Idle, ScanningCatalog) | (Stopped, ScanningCatalog) |
            // Catalog
            (ScanningCatalog, AwaitingDiscovery) | (ScanningCatalog, ItemOpening) |
            (AwaitingDiscovery, ItemOpening) |
            // Item pipeline, forward
            (ItemOpening, ItemExtracting) |
            (ItemExtracting, ItemGenerating) |
            (ItemGenerating, ItemSubmitting) |
            (ItemSubmitting, ItemAwaitingResult) |
            // Item finished (any outcome): next item or wait for the catalog
            (ItemOpening | ItemExtracting | ItemGenerating | ItemSubmitting | ItemAwaitingResult,
             ItemOpening | AwaitingDiscovery)
        )
    }

    /// Whether a new run may start from this phase.
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ScanningCatalog => "scanning_catalog",
            Self::AwaitingDiscovery => "awaiting_discovery",
            Self::ItemOpening => "item_opening",
            Self::ItemExtracting => "item_extracting",
            Self::ItemGenerating => "item_generating",
            Self::ItemSubmitting => "item_submitting",
            Self::ItemAwaitingResult => "item_awaiting_result",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A phase transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Previous phase.
    pub from: RunPhase,
    /// New phase.
    pub to: RunPhase,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// What caused it (an item url, a stop reason, ...).
    pub reason: Option<String>,
}

/// The item currently in flight.
#[derive(Debug, Clone)]
pub struct CurrentItem {
    pub item: Item,
    pub context: ContextId,
    /// Set once the worker context reported ready.
    pub handle: Option<ContextHandle>,
}

/// All mutable state of a run. Owned by the orchestrator alone.
#[derive(Debug)]
pub struct RunState {
    /// Identifier of the current (or last) run. Tags catalog results.
    pub run_id: Option<Uuid>,
    /// Current phase.
    pub phase: RunPhase,
    /// Cleared by the first stop; everything arriving afterwards is late.
    pub running: bool,
    /// The item in flight, if any. At most one.
    pub current: Option<CurrentItem>,
    /// Items discovered and not yet started.
    pub queue: ItemQueue,
    /// Catalog this run works through. Signals from other catalogs are dropped.
    pub catalog: Option<CatalogRef>,
    /// `has_more` from the most recent discovery of this run.
    pub catalog_has_more: Option<bool>,
    /// A scan or page advance has been requested and has not answered yet.
    pub catalog_pending: bool,
    /// Transition history, oldest first, capped at 200 entries.
    pub transitions: Vec<PhaseTransition>,
    /// Last context ticket handed out.
    next_context: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: None,
            phase: RunPhase::Idle,
            running: false,
            current: None,
            queue: ItemQueue::new(),
            catalog: None,
            catalog_has_more: None,
            catalog_pending: false,
            transitions: Vec::new(),
            next_context: 0,
        }
    }

    /// Reset per-run bookkeeping and mark the run as running.
    ///
    /// Context tickets keep counting across runs so a late event from a
    /// previous run can never match a new item.
    pub fn begin(&mut self, catalog: CatalogRef) -> Uuid {
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        self.running = true;
        self.current = None;
        self.queue.clear();
        self.catalog = Some(catalog);
        self.catalog_has_more = None;
        self.catalog_pending = false;
        run_id
    }

    /// Transition to a new phase.
    pub fn transition_to(
        &mut self,
        new_phase: RunPhase,
        reason: Option<String>,
    ) -> Result<(), RunError> {
        if !self.phase.can_transition_to(new_phase) {
            return Err(RunError::InvalidTransition {
                from: self.phase,
                to: new_phase,
            });
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to: new_phase,
            timestamp: Utc::now(),
            reason,
        });

        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.phase = new_phase;
        Ok(())
    }

    /// Allocate the ticket for the next dequeued item.
    pub fn next_context_id(&mut self) -> ContextId {
        self.next_context += 1;
        ContextId(self.next_context)
    }

    /// Whether `context` belongs to the item in flight of a running run.
    pub fn is_current(&self, context: ContextId) -> bool {
        self.running
            && self
                .current
                .as_ref()
                .is_some_and(|c| c.context == context)
    }

    pub fn clear_current(&mut self) -> Option<CurrentItem> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions_valid() {
        use RunPhase::*;
        assert!(Idle.can_transition_to(ScanningCatalog));
        assert!(Stopped.can_transition_to(ScanningCatalog));
        assert!(ScanningCatalog.can_transition_to(ItemOpening));
        assert!(ItemOpening.can_transition_to(ItemExtracting));
        assert!(ItemExtracting.can_transition_to(ItemGenerating));
        assert!(ItemGenerating.can_transition_to(ItemSubmitting));
        assert!(ItemSubmitting.can_transition_to(ItemAwaitingResult));
        assert!(ItemAwaitingResult.can_transition_to(ItemOpening));
        assert!(ItemGenerating.can_transition_to(AwaitingDiscovery));
        assert!(AwaitingDiscovery.can_transition_to(Stopped));
    }

    #[test]
    fn phase_transitions_invalid() {
        use RunPhase::*;
        assert!(!Idle.can_transition_to(ItemOpening));
        assert!(!ItemOpening.can_transition_to(ItemGenerating));
        assert!(!ItemAwaitingResult.can_transition_to(ItemExtracting));
        assert!(!Stopped.can_transition_to(Stopped));
        assert!(!AwaitingDiscovery.can_transition_to(ScanningCatalog));
        assert!(!ScanningCatalog.can_transition_to(ScanningCatalog));
    }

    #[test]
    fn startable_phases() {
        assert!(RunPhase::Idle.is_startable());
        assert!(RunPhase::Stopped.is_startable());
        assert!(!RunPhase::ScanningCatalog.is_startable());
    }

    #[test]
    fn invalid_transition_leaves_phase_unchanged() {
        let mut state = RunState::new();
        let err = state
            .transition_to(RunPhase::ItemSubmitting, None)
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidTransition { .. }));
        assert_eq!(state.phase, RunPhase::Idle);
        assert!(state.transitions.is_empty());
    }

    #[test]
    fn transition_history_capped() {
        let mut state = RunState::new();
        state.transition_to(RunPhase::ScanningCatalog, None).unwrap();
        state.transition_to(RunPhase::ItemOpening, None).unwrap();
        for _ in 0..250 {
            state.transition_to(RunPhase::ItemOpening, None).unwrap();
        }
        assert!(state.transitions.len() <= 200);
    }

    #[test]
    fn context_ids_survive_new_runs() {
        let mut state = RunState::new();
        state.begin(CatalogRef("tab-1".into()));
        let first = state.next_context_id();
        state.begin(CatalogRef("tab-1".into()));
        let second = state.next_context_id();
        assert!(second > first);
    }

    #[test]
    fn is_current_requires_running() {
        let mut state = RunState::new();
        state.begin(CatalogRef("tab-1".into()));
        let ctx = state.next_context_id();
        state.current = Some(CurrentItem {
            item: Item::new("https://example.com/1", "One"),
            context: ctx,
            handle: None,
        });
        assert!(state.is_current(ctx));
        assert!(!state.is_current(ContextId(ctx.0 + 1)));
        state.running = false;
        assert!(!state.is_current(ctx));
    }
}

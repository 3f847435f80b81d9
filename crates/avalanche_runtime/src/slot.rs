//! Per-slot scheduling state.
//!
//! A slot holds one event. Its work is split into traversals: the main
//! traversal walks the whole control-flow tree, and every view opens a
//! traversal of its own rooted at the view node. Traversals live in an
//! arena and refer to their parent by position.

use std::sync::Arc;
use std::time::Instant;

use avalanche_core::{AlgIndex, AlgState, CoreError, EventId, NodeIndex, SlotIndex};
use avalanche_plan::PrecedenceGraph;
use avalanche_store::Partition;
use indexmap::{IndexMap, IndexSet};

use crate::control::ControlFlowState;
use crate::views::ViewGroup;

/// One walk of a control-flow subtree against one store partition
#[derive(Debug)]
pub(crate) struct Traversal {
    /// Scope root
    pub scope: NodeIndex,
    /// Parent traversal, `None` for the main traversal
    pub parent: Option<usize>,
    /// Position among the views of the parent's view node
    pub view: Option<usize>,
    /// Store partition
    pub store: Arc<Partition>,
    /// Control-flow decisions
    pub cf: ControlFlowState,
    /// Algorithm states, indexed by algorithm
    pub states: Vec<AlgState>,
    /// Algorithms to re-evaluate on the next pass
    pub dirty: IndexSet<AlgIndex>,
    /// Data-ready algorithms waiting for a clone
    pub ready: IndexSet<AlgIndex>,
    /// View nodes whose maker finished but whose views are not open yet
    pub pending_views: IndexSet<NodeIndex>,
    /// Open view groups by view node
    pub groups: IndexMap<NodeIndex, ViewGroup>,
    /// Tasks running for this traversal
    pub in_flight: usize,
    /// Every remaining algorithm was skipped from outside
    pub cancelled: bool,
    /// Work is over
    pub finished: bool,
}

impl Traversal {
    pub fn new(
        graph: &PrecedenceGraph,
        scope: NodeIndex,
        parent: Option<usize>,
        view: Option<usize>,
        store: Arc<Partition>,
    ) -> Self {
        Self {
            scope,
            parent,
            view,
            store,
            cf: ControlFlowState::new(graph, scope),
            states: vec![AlgState::Initial; graph.alg_count()],
            dirty: graph.scope_algorithms(scope).iter().copied().collect(),
            ready: IndexSet::new(),
            pending_views: IndexSet::new(),
            groups: IndexMap::new(),
            in_flight: 0,
            cancelled: false,
            finished: false,
        }
    }

    pub fn state(&self, alg: AlgIndex) -> AlgState {
        self.states[alg.as_usize()]
    }

    /// Move an algorithm forward
    ///
    /// Illegal transitions are internal errors.
    pub fn transition(&mut self, graph: &PrecedenceGraph, alg: AlgIndex, next: AlgState) -> Result<(), CoreError> {
        let current = self.state(alg);
        if !current.can_transition_to(next) {
            return Err(CoreError::internal(format!(
                "{} cannot move from {} to {}",
                graph.name(alg),
                current,
                next
            )));
        }
        self.states[alg.as_usize()] = next;
        Ok(())
    }

    /// Skip an algorithm that has not been submitted
    ///
    /// Returns whether anything changed.
    pub fn skip(&mut self, graph: &PrecedenceGraph, alg: AlgIndex) -> bool {
        let state = self.state(alg);
        if state.is_terminal() || state == AlgState::Scheduled {
            return false;
        }
        self.states[alg.as_usize()] = AlgState::EvtRejected;
        self.ready.swap_remove(&alg);
        self.dirty.swap_remove(&alg);
        if let Some(leaf) = graph.cf_node_of(alg) {
            self.cf.skip_leaf(leaf);
        }
        true
    }

    /// Algorithms still waiting on control flow
    pub fn waiting_on_control(&self, graph: &PrecedenceGraph) -> Vec<AlgIndex> {
        graph
            .scope_algorithms(self.scope)
            .iter()
            .copied()
            .filter(|a| self.state(*a) == AlgState::Initial)
            .collect()
    }

    /// Whether the traversal can be closed
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0 && self.groups.is_empty() && (self.cancelled || self.cf.root_decision().is_decided())
    }
}

/// One event slot
#[derive(Debug)]
pub(crate) struct EventSlot {
    pub index: SlotIndex,
    /// Event in the slot, `None` when free
    pub event: Option<EventId>,
    pub seq: u64,
    pub started: Instant,
    pub traversals: Vec<Traversal>,
    pub failures: Vec<CoreError>,
    /// A failure that must stop the job under stop-on-error
    pub fatal: bool,
    /// Remaining work was cancelled after a failure
    pub cancelled: bool,
    /// The finished event has been handed to the event loop
    pub reported: bool,
}

impl EventSlot {
    pub fn new(index: SlotIndex) -> Self {
        Self {
            index,
            event: None,
            seq: 0,
            started: Instant::now(),
            traversals: Vec::new(),
            failures: Vec::new(),
            fatal: false,
            cancelled: false,
            reported: false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.event.is_some()
    }

    /// Whether the slot still has work
    pub fn is_active(&self) -> bool {
        self.is_occupied() && !self.reported
    }

    pub fn in_flight(&self) -> usize {
        self.traversals.iter().map(|t| t.in_flight).sum()
    }

    /// Traversal and all traversals nested below it, in arena order
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut out = vec![root];
        for (i, t) in self.traversals.iter().enumerate().skip(root + 1) {
            if t.parent.is_some_and(|p| out.contains(&p)) {
                out.push(i);
            }
        }
        out
    }

    /// Return the slot to the free list
    pub fn vacate(&mut self) {
        self.event = None;
        self.traversals.clear();
        self.failures.clear();
        self.fatal = false;
        self.cancelled = false;
        self.reported = false;
    }
}

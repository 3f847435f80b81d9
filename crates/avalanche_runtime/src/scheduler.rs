//! Scheduler core.
//!
//! Owns every slot's algorithm states and moves them forward:
//! `Initial -> ControlReady -> DataReady -> Scheduled -> terminal`.
//! The core is single-threaded: the dispatcher thread calls [`SchedulerCore::pump`]
//! to promote states and collect tasks, and [`SchedulerCore::complete`] when a
//! worker returns. Promotion is dirty-set driven; only algorithms touched by
//! a completion or a control-flow decision are re-examined.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use avalanche_core::{
    AlgIndex, AlgState, CoreError, CoreResult, Decision, EventId, NodeIndex, SlotIndex, StatusCode,
};
use avalanche_plan::{ErrorPolicy, PrecedenceGraph, SchedulerSettings};
use avalanche_store::{ConditionsStore, StoreError, Whiteboard, DEFAULT_SHARDS};

use crate::algorithm::AlgorithmRegistry;
use crate::dump::{self, StallReport};
use crate::event::{EventOutcome, EventRecord, FinishedEvent};
use crate::executor::{Completion, Task, TaskOutcome};
use crate::monitor::RunMonitor;
use crate::pool::AlgorithmResourcePool;
use crate::slot::{EventSlot, Traversal};
use crate::views::ViewManager;

/// Whether an algorithm's inputs can be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputStatus {
    Present,
    Pending(String),
    Fault { path: String, reason: String },
}

/// Single-threaded scheduling state
pub struct SchedulerCore {
    graph: Arc<PrecedenceGraph>,
    policy: ErrorPolicy,
    check_outputs: bool,
    whiteboard: Whiteboard,
    conditions: Arc<ConditionsStore>,
    pool: AlgorithmResourcePool,
    monitor: Arc<RunMonitor>,
    slots: Vec<EventSlot>,
    /// Conditions algorithm and run to the slot currently producing it
    claims: HashMap<(AlgIndex, u32), SlotIndex>,
    next_task: u64,
    cpu_limit: usize,
    blocking_limit: usize,
    cpu_in_flight: usize,
    blocking_in_flight: usize,
    finished: VecDeque<FinishedEvent>,
}

impl SchedulerCore {
    /// Create the core and initialize the first clone of every algorithm
    ///
    /// # Errors
    ///
    /// `Configuration` if an algorithm type is unknown or fails to initialize
    pub fn new(
        graph: Arc<PrecedenceGraph>,
        registry: AlgorithmRegistry,
        settings: &SchedulerSettings,
        monitor: Arc<RunMonitor>,
    ) -> CoreResult<Self> {
        let pool = AlgorithmResourcePool::new(Arc::clone(&graph), registry)?;
        let slots = settings.slots.max(1);
        Ok(Self {
            graph,
            policy: settings.error_policy,
            check_outputs: settings.check_outputs,
            whiteboard: Whiteboard::new(slots, DEFAULT_SHARDS),
            conditions: Arc::new(ConditionsStore::new()),
            pool,
            monitor,
            slots: (0..slots).map(|i| EventSlot::new(SlotIndex::from_usize(i))).collect(),
            claims: HashMap::new(),
            next_task: 0,
            cpu_limit: settings.resolved_threads().max(1),
            blocking_limit: settings.blocking_threads,
            cpu_in_flight: 0,
            blocking_in_flight: 0,
            finished: VecDeque::new(),
        })
    }

    /// Precedence graph
    #[must_use]
    pub fn graph(&self) -> &Arc<PrecedenceGraph> {
        &self.graph
    }

    /// Conditions store shared with the workers
    #[must_use]
    pub fn conditions(&self) -> &Arc<ConditionsStore> {
        &self.conditions
    }

    /// Run monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<RunMonitor> {
        &self.monitor
    }

    /// Clone pool
    #[must_use]
    pub fn pool(&self) -> &AlgorithmResourcePool {
        &self.pool
    }

    /// Number of slots
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots not holding an event
    #[must_use]
    pub fn free_slots(&self) -> Vec<SlotIndex> {
        self.slots.iter().filter(|s| !s.is_occupied()).map(|s| s.index).collect()
    }

    /// Tasks submitted and not completed
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.cpu_in_flight + self.blocking_in_flight
    }

    /// Slots still processing an event
    #[must_use]
    pub fn active_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    pub(crate) fn slots(&self) -> &[EventSlot] {
        &self.slots
    }

    fn slot_mut(&mut self, slot: SlotIndex) -> CoreResult<&mut EventSlot> {
        self.slots
            .get_mut(slot.as_usize())
            .ok_or_else(|| StoreError::UnknownSlot { slot }.into())
    }

    /// Assign an event to a free slot
    ///
    /// # Errors
    ///
    /// `Source` if the pre-populated objects cannot be stored; internal
    /// error if the slot is occupied
    pub fn start_event(&mut self, slot: SlotIndex, seq: u64, record: EventRecord) -> CoreResult<()> {
        let store = Arc::clone(
            self.whiteboard
                .partition(slot)
                .ok_or(StoreError::UnknownSlot { slot })?,
        );
        let graph = Arc::clone(&self.graph);
        let s = self.slot_mut(slot)?;
        if s.is_occupied() {
            return Err(CoreError::internal(format!("{} is already occupied", slot)));
        }
        for (path, object) in record.objects {
            store.put(path.clone(), object).map_err(|e| CoreError::Source {
                reason: format!("cannot pre-populate {} for event {}: {}", path, record.id, e),
            })?;
        }

        let mut main = Traversal::new(&graph, graph.root(), None, None, store);
        main.dirty.extend(graph.conditions_algorithms().iter().copied());
        s.event = Some(record.id);
        s.seq = seq;
        s.started = Instant::now();
        s.traversals.push(main);
        self.monitor.slot_started(slot, record.id);
        tracing::debug!(slot = %slot, event = %record.id, seq, "event started");
        Ok(())
    }

    /// Promote every slot as far as possible and collect tasks to submit
    ///
    /// Finished events become available through [`Self::take_finished`].
    ///
    /// # Errors
    ///
    /// Only internal errors; algorithm failures are recorded on their event
    pub fn pump(&mut self) -> CoreResult<Vec<Task>> {
        loop {
            let mut changed = false;
            for si in self.slot_order() {
                changed |= self.update_slot(si)?;
            }
            if !changed {
                break;
            }
        }
        self.dispatch()
    }

    /// Active slots in submission order
    fn slot_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.slots.len()).filter(|i| self.slots[*i].is_active()).collect();
        order.sort_by_key(|i| self.slots[*i].seq);
        order
    }

    fn update_slot(&mut self, si: usize) -> CoreResult<bool> {
        let mut changed = false;
        let mut t = 0;
        // views opened during the pass are visited in the same pass
        while t < self.slots[si].traversals.len() {
            if !self.slots[si].traversals[t].finished {
                changed |= self.promote(si, t)?;
                changed |= self.open_pending_views(si, t)?;
            }
            t += 1;
        }
        changed |= self.settle(si)?;
        Ok(changed)
    }

    fn promote(&mut self, si: usize, t: usize) -> CoreResult<bool> {
        let graph = Arc::clone(&self.graph);
        let mut dirty: Vec<AlgIndex> = std::mem::take(&mut self.slots[si].traversals[t].dirty)
            .into_iter()
            .collect();
        dirty.sort_by_key(|a| graph.priority(*a));

        let mut changed = false;
        for alg in dirty {
            match self.slots[si].traversals[t].state(alg) {
                AlgState::Initial if graph.is_conditions(alg) => {
                    if self.claim_conditions(si, alg)? {
                        changed = true;
                        if self.slots[si].traversals[t].state(alg) == AlgState::ControlReady {
                            self.check_data(si, t, alg)?;
                        }
                    }
                }
                AlgState::Initial => {
                    let Some(leaf) = graph.cf_node_of(alg) else {
                        continue;
                    };
                    let cf = &self.slots[si].traversals[t].cf;
                    if !cf.is_active(&graph, leaf) {
                        changed |= self.skip_alg(si, t, alg)?;
                    } else if cf.is_eligible(&graph, leaf) {
                        self.slots[si].traversals[t].transition(&graph, alg, AlgState::ControlReady)?;
                        changed = true;
                        self.check_data(si, t, alg)?;
                    }
                }
                AlgState::ControlReady => changed |= self.check_data(si, t, alg)?,
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Serve a conditions algorithm from the store, wait for another slot
    /// producing it, or claim it for this slot
    fn claim_conditions(&mut self, si: usize, alg: AlgIndex) -> CoreResult<bool> {
        let graph = Arc::clone(&self.graph);
        let slot = &self.slots[si];
        let event = slot_event(slot)?;
        let index = slot.index;
        if self.conditions.all_valid(graph.algorithm(alg).outputs.iter(), event)? {
            self.slots[si].traversals[0].transition(&graph, alg, AlgState::EvtAccepted)?;
            tracing::trace!(alg = %graph.name(alg), event = %event, "conditions already valid");
            return Ok(true);
        }
        match self.claims.get(&(alg, event.run)) {
            Some(_) => Ok(false),
            None => {
                self.claims.insert((alg, event.run), index);
                self.slots[si].traversals[0].transition(&graph, alg, AlgState::ControlReady)?;
                tracing::debug!(alg = %graph.name(alg), run = event.run, slot = %index, "conditions claimed");
                Ok(true)
            }
        }
    }

    fn check_data(&mut self, si: usize, t: usize, alg: AlgIndex) -> CoreResult<bool> {
        match self.input_status(si, t, alg)? {
            InputStatus::Present => {
                let traversal = &mut self.slots[si].traversals[t];
                traversal.transition(&self.graph, alg, AlgState::DataReady)?;
                traversal.ready.insert(alg);
                Ok(true)
            }
            InputStatus::Pending(_) => Ok(false),
            InputStatus::Fault { path, reason } => {
                let event = slot_event(&self.slots[si])?;
                let err = CoreError::DataFault {
                    alg: self.graph.name(alg).to_string(),
                    event,
                    path,
                    reason,
                };
                self.finish_alg(si, t, alg, AlgState::Error, Some(err), false)?;
                Ok(true)
            }
        }
    }

    pub(crate) fn input_status(&self, si: usize, t: usize, alg: AlgIndex) -> CoreResult<InputStatus> {
        let slot = &self.slots[si];
        let event = slot_event(slot)?;
        let traversal = &slot.traversals[t];
        for path in &self.graph.algorithm(alg).inputs {
            if path.is_conditions() {
                if self.conditions.contains(path, event)? {
                    continue;
                }
                let producer = self.graph.data_producer(path).and_then(|p| p.algorithm());
                return Ok(match producer {
                    Some(p) if slot.traversals[0].state(p).is_terminal() => InputStatus::Fault {
                        path: path.to_string(),
                        reason: "is not valid for this run after its producer finished".to_string(),
                    },
                    Some(_) => InputStatus::Pending(path.to_string()),
                    None => InputStatus::Fault {
                        path: path.to_string(),
                        reason: "has no conditions producer".to_string(),
                    },
                });
            }
            if traversal.store.contains(path)? {
                continue;
            }
            if traversal.store.is_done(path)? {
                return Ok(InputStatus::Fault {
                    path: path.to_string(),
                    reason: "was not written by its producer".to_string(),
                });
            }
            return Ok(InputStatus::Pending(path.to_string()));
        }
        Ok(InputStatus::Present)
    }

    /// Lend clones to data-ready algorithms within the worker limits
    fn dispatch(&mut self) -> CoreResult<Vec<Task>> {
        let graph = Arc::clone(&self.graph);
        let mut candidates = Vec::new();
        for slot in self.slots.iter().filter(|s| s.is_active()) {
            for (t, traversal) in slot.traversals.iter().enumerate().filter(|(_, tr)| !tr.finished) {
                for alg in &traversal.ready {
                    candidates.push((slot.seq, graph.priority(*alg), slot.index, t, *alg));
                }
            }
        }
        candidates.sort();

        let mut tasks = Vec::new();
        for (_, _, slot, t, alg) in candidates {
            let blocking = self.is_blocking(alg);
            let full = if blocking {
                self.blocking_in_flight >= self.blocking_limit
            } else {
                self.cpu_in_flight >= self.cpu_limit
            };
            if full {
                continue;
            }
            let Some(clone) = self.pool.acquire(alg)? else {
                continue;
            };
            let s = &mut self.slots[slot.as_usize()];
            let event = slot_event(s)?;
            let traversal = &mut s.traversals[t];
            traversal.ready.swap_remove(&alg);
            traversal.transition(&graph, alg, AlgState::Scheduled)?;
            traversal.in_flight += 1;
            if blocking {
                self.blocking_in_flight += 1;
            } else {
                self.cpu_in_flight += 1;
            }
            self.next_task += 1;
            tasks.push(Task {
                id: self.next_task,
                slot,
                traversal: t,
                alg,
                event,
                view: traversal.view,
                store: Arc::clone(&traversal.store),
                clone,
            });
        }
        Ok(tasks)
    }

    /// Whether a task of `alg` goes to the blocking pool
    #[must_use]
    pub fn is_blocking(&self, alg: AlgIndex) -> bool {
        self.blocking_limit > 0 && self.graph.algorithm(alg).blocking
    }

    /// Apply a worker's result
    ///
    /// # Errors
    ///
    /// Only internal errors; algorithm failures are recorded on their event
    pub fn complete(&mut self, done: Completion) -> CoreResult<()> {
        if self.is_blocking(done.alg) {
            self.blocking_in_flight = self.blocking_in_flight.saturating_sub(1);
        } else {
            self.cpu_in_flight = self.cpu_in_flight.saturating_sub(1);
        }
        let Completion {
            id,
            slot,
            traversal: t,
            alg,
            clone,
            outcome,
            finished,
        } = done;
        if matches!(outcome, TaskOutcome::Panic(_)) {
            self.pool.discard(clone)?;
        } else {
            self.pool.release(clone)?;
        }

        let si = slot.as_usize();
        let graph = Arc::clone(&self.graph);
        let desc = graph.algorithm(alg);
        let event = slot_event(self.slot_mut(slot)?)?;
        let traversal = &mut self.slots[si].traversals[t];
        traversal.in_flight = traversal.in_flight.saturating_sub(1);

        let failure = |reason: String| CoreError::AlgorithmFailure {
            alg: desc.name.clone(),
            event,
            reason,
        };
        let (mut state, mut error, recoverable) = match outcome {
            TaskOutcome::Status(status) => (
                status.terminal_state(),
                match status {
                    StatusCode::Failure => Some(failure("returned FAILURE".to_string())),
                    StatusCode::Recoverable => Some(failure("returned RECOVERABLE".to_string())),
                    _ => None,
                },
                status == StatusCode::Recoverable,
            ),
            TaskOutcome::Error(
                err @ (CoreError::DataFault { .. }
                | CoreError::IsolationViolation { .. }
                | CoreError::AlgorithmFailure { .. }),
            ) => (AlgState::Error, Some(err), false),
            TaskOutcome::Error(err) => (AlgState::Error, Some(failure(err.to_string())), false),
            TaskOutcome::Panic(message) => (AlgState::Error, Some(failure(format!("panicked: {}", message))), false),
        };

        if state != AlgState::Error && self.check_outputs {
            if let Some(path) = self.missing_output(si, t, alg, event)? {
                error = Some(CoreError::DataFault {
                    alg: desc.name.clone(),
                    event,
                    path,
                    reason: "declared output was not written".to_string(),
                });
                state = AlgState::Error;
            }
        }
        self.monitor.task_finished(id, state, finished);

        let store = Arc::clone(&self.slots[si].traversals[t].store);
        for path in desc.produced_paths().filter(|p| !p.is_conditions()) {
            store.mark_done(path.clone())?;
        }
        self.finish_alg(si, t, alg, state, error, recoverable)
    }

    fn missing_output(&self, si: usize, t: usize, alg: AlgIndex, event: EventId) -> CoreResult<Option<String>> {
        let desc = self.graph.algorithm(alg);
        let store = &self.slots[si].traversals[t].store;
        let collection = desc.views.as_ref().map(|v| &v.collection);
        for path in desc.outputs.iter().chain(collection) {
            let present = if path.is_conditions() {
                self.conditions.contains(path, event)?
            } else {
                store.contains_local(path)?
            };
            if !present {
                return Ok(Some(path.to_string()));
            }
        }
        Ok(None)
    }

    /// Move an algorithm to its terminal state and propagate the consequences
    fn finish_alg(
        &mut self,
        si: usize,
        t: usize,
        alg: AlgIndex,
        state: AlgState,
        error: Option<CoreError>,
        recoverable: bool,
    ) -> CoreResult<()> {
        let graph = Arc::clone(&self.graph);
        {
            let traversal = &mut self.slots[si].traversals[t];
            traversal.ready.swap_remove(&alg);
            traversal.dirty.swap_remove(&alg);
            traversal.transition(&graph, alg, state)?;
        }
        if let Some(err) = error {
            self.record_failure(si, err, recoverable)?;
        }

        if graph.is_conditions(alg) {
            let event = slot_event(&self.slots[si])?;
            if self.claims.get(&(alg, event.run)) == Some(&self.slots[si].index) {
                self.claims.remove(&(alg, event.run));
            }
            self.wake_conditions(alg, event.run);
            self.notify_conditions_written(alg);
            return Ok(());
        }

        if let Some(leaf) = graph.cf_node_of(alg) {
            let decided = self.slots[si].traversals[t].cf.set_decision(&graph, leaf, state.decision());
            self.on_decided(si, t, &decided)?;
        }
        if let Some((node, _)) = graph.views_of(alg) {
            self.slots[si].traversals[t].pending_views.insert(node);
        }
        self.notify_written(si, t, alg);
        Ok(())
    }

    fn record_failure(&mut self, si: usize, err: CoreError, recoverable: bool) -> CoreResult<()> {
        let slot = &mut self.slots[si];
        let event = slot_event(slot)?;
        if recoverable {
            tracing::warn!(slot = %slot.index, event = %event, error = %err, "recoverable failure");
        } else {
            tracing::error!(slot = %slot.index, event = %event, error = %err, "algorithm failed");
        }
        slot.failures.push(err);
        if !recoverable {
            slot.fatal = true;
            if self.policy == ErrorPolicy::StopOnError && !slot.cancelled {
                self.cancel_slot(si)?;
            }
        }
        Ok(())
    }

    /// React to control-flow nodes that just got decided
    fn on_decided(&mut self, si: usize, t: usize, decided: &[NodeIndex]) -> CoreResult<()> {
        if decided.is_empty() {
            return Ok(());
        }
        let graph = Arc::clone(&self.graph);
        let vm = ViewManager::new(&graph);
        let scope = self.slots[si].traversals[t].scope;
        for node in decided {
            let node = *node;
            if graph.node(node).alg().is_some() || (graph.is_view_node(node) && node != scope) {
                continue;
            }
            let (algs, views) = graph.owned_descendants(node);
            for alg in algs {
                if self.skip_alg(si, t, alg)? {
                    if let Some((view_node, _)) = graph.views_of(alg) {
                        self.slots[si].traversals[t].pending_views.insert(view_node);
                    }
                }
            }
            for view_node in views {
                self.slots[si].traversals[t].pending_views.swap_remove(&view_node);
                let skipped = vm.cancel(&mut self.slots[si], t, view_node);
                (0..skipped).for_each(|_| self.monitor.algorithm_skipped());
            }
        }
        let traversal = &mut self.slots[si].traversals[t];
        let waiting = traversal.waiting_on_control(&graph);
        traversal.dirty.extend(waiting);
        Ok(())
    }

    /// Skip an algorithm that control flow ruled out
    ///
    /// Its outputs will never appear, so they are marked done and any reader
    /// already waiting for them is re-examined and faults.
    fn skip_alg(&mut self, si: usize, t: usize, alg: AlgIndex) -> CoreResult<bool> {
        let graph = Arc::clone(&self.graph);
        let traversal = &mut self.slots[si].traversals[t];
        if !traversal.skip(&graph, alg) {
            return Ok(false);
        }
        for path in graph.algorithm(alg).produced_paths().filter(|p| !p.is_conditions()) {
            traversal.store.mark_done(path.clone())?;
        }
        self.monitor.algorithm_skipped();
        self.notify_written(si, t, alg);
        Ok(true)
    }

    /// Mark consumers of `alg`'s outputs dirty in the traversal and below it
    fn notify_written(&mut self, si: usize, t: usize, alg: AlgIndex) {
        let graph = Arc::clone(&self.graph);
        let subtree = self.slots[si].subtree(t);
        for path in graph.algorithm(alg).produced_paths().filter(|p| !p.is_conditions()) {
            for consumer in graph.data_consumers(path) {
                for u in &subtree {
                    let traversal = &mut self.slots[si].traversals[*u];
                    if traversal.state(*consumer) == AlgState::ControlReady {
                        traversal.dirty.insert(*consumer);
                    }
                }
            }
        }
    }

    /// Conditions are visible to every slot
    fn notify_conditions_written(&mut self, alg: AlgIndex) {
        let graph = Arc::clone(&self.graph);
        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            for traversal in &mut slot.traversals {
                for path in &graph.algorithm(alg).outputs {
                    for consumer in graph.data_consumers(path) {
                        if traversal.state(*consumer) == AlgState::ControlReady {
                            traversal.dirty.insert(*consumer);
                        }
                    }
                }
            }
        }
    }

    /// Re-examine slots waiting for another slot's conditions claim
    fn wake_conditions(&mut self, alg: AlgIndex, run: u32) {
        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            if slot.event.is_some_and(|e| e.run == run) {
                if let Some(main) = slot.traversals.first_mut() {
                    if main.state(alg) == AlgState::Initial {
                        main.dirty.insert(alg);
                    }
                }
            }
        }
    }

    /// Skip all remaining work of a slot after a failure
    fn cancel_slot(&mut self, si: usize) -> CoreResult<()> {
        let graph = Arc::clone(&self.graph);
        let vm = ViewManager::new(&graph);
        let slot = &mut self.slots[si];
        let event = slot_event(slot)?;
        slot.cancelled = true;
        let mut skipped = 0;
        for t in 0..slot.traversals.len() {
            skipped += vm.cancel_traversal(slot, t);
        }
        let mut released = Vec::new();
        for alg in graph.conditions_algorithms() {
            let main = &mut slot.traversals[0];
            if main.skip(&graph, *alg) {
                skipped += 1;
                if self.claims.get(&(*alg, event.run)) == Some(&slot.index) {
                    self.claims.remove(&(*alg, event.run));
                    released.push(*alg);
                }
            }
        }
        for alg in released {
            self.wake_conditions(alg, event.run);
        }
        (0..skipped).for_each(|_| self.monitor.algorithm_skipped());
        tracing::warn!(slot = %self.slots[si].index, event = %event, skipped, "remaining work cancelled");
        Ok(())
    }

    fn open_pending_views(&mut self, si: usize, t: usize) -> CoreResult<bool> {
        let graph = Arc::clone(&self.graph);
        let pending: Vec<NodeIndex> = self.slots[si].traversals[t].pending_views.iter().copied().collect();
        let mut changed = false;
        for node in pending {
            let traversal = &mut self.slots[si].traversals[t];
            if traversal.cf.is_decided(node) || !traversal.cf.is_active(&graph, node) {
                traversal.pending_views.swap_remove(&node);
                changed = true;
                continue;
            }
            if !traversal.cf.is_eligible(&graph, node) {
                continue;
            }
            traversal.pending_views.swap_remove(&node);
            changed = true;

            let event = slot_event(&self.slots[si])?;
            let decision = match ViewManager::new(&graph).create_views(&mut self.slots[si], t, node, event) {
                Ok(None) => continue,
                Ok(Some(decision)) => decision,
                Err(err) => {
                    self.record_failure(si, err, false)?;
                    Decision::False
                }
            };
            let decided = self.slots[si].traversals[t].cf.set_decision(&graph, node, decision);
            self.on_decided(si, t, &decided)?;
        }
        Ok(changed)
    }

    /// Close settled traversals and report the slot once its main
    /// traversal is done
    fn settle(&mut self, si: usize) -> CoreResult<bool> {
        if !self.slots[si].is_active() {
            return Ok(false);
        }
        let graph = Arc::clone(&self.graph);
        let vm = ViewManager::new(&graph);
        let mut changed = false;
        // nested views sit after their parents in the arena
        for t in (1..self.slots[si].traversals.len()).rev() {
            let traversal = &mut self.slots[si].traversals[t];
            if traversal.finished || !traversal.is_settled() {
                continue;
            }
            traversal.finished = true;
            changed = true;
            if let Some(closed) = vm.view_finished(&mut self.slots[si], t) {
                if let Some(decision) = closed.decision {
                    let decided = self.slots[si].traversals[closed.parent]
                        .cf
                        .set_decision(&graph, closed.node, decision);
                    self.on_decided(si, closed.parent, &decided)?;
                }
            }
        }

        let main = &self.slots[si].traversals[0];
        if !main.finished && main.is_settled() && !self.owns_pending_conditions(si) {
            self.slots[si].traversals[0].finished = true;
            self.report(si)?;
            changed = true;
        }
        Ok(changed)
    }

    /// Whether the slot claimed conditions it has not produced yet
    fn owns_pending_conditions(&self, si: usize) -> bool {
        let slot = &self.slots[si];
        let Some(event) = slot.event else {
            return false;
        };
        self.graph.conditions_algorithms().iter().any(|alg| {
            self.claims.get(&(*alg, event.run)) == Some(&slot.index) && !slot.traversals[0].state(*alg).is_terminal()
        })
    }

    fn report(&mut self, si: usize) -> CoreResult<()> {
        let graph = Arc::clone(&self.graph);
        let slot = &mut self.slots[si];
        let event = slot_event(slot)?;
        slot.reported = true;
        let main = &slot.traversals[0];
        let outcome = if !slot.failures.is_empty() {
            EventOutcome::Failed
        } else {
            match main.cf.root_decision() {
                Decision::True => EventOutcome::Accepted,
                Decision::False => EventOutcome::Rejected,
                Decision::Undefined => EventOutcome::Failed,
            }
        };
        let states = graph
            .scope_algorithms(graph.root())
            .iter()
            .chain(graph.conditions_algorithms())
            .map(|alg| (graph.name(*alg).to_string(), main.state(*alg)))
            .collect();
        let elapsed = slot.started.elapsed();
        tracing::debug!(
            slot = %slot.index,
            event = %event,
            outcome = %outcome,
            views = slot.traversals.len() - 1,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "event finished"
        );
        self.finished.push_back(FinishedEvent {
            slot: slot.index,
            event,
            seq: slot.seq,
            outcome,
            failures: slot.failures.clone(),
            fatal: slot.fatal,
            states,
            store: Arc::clone(&main.store),
            views: slot.traversals[1..].iter().map(|t| Arc::clone(&t.store)).collect(),
            elapsed,
        });
        self.monitor.slot_finished(slot.index);
        Ok(())
    }

    /// Finished events not yet handed out
    pub fn take_finished(&mut self) -> Vec<FinishedEvent> {
        self.finished.drain(..).collect()
    }

    /// Free a slot whose event has been committed
    ///
    /// # Errors
    ///
    /// Internal error if the event has not finished yet
    pub fn release_slot(&mut self, slot: SlotIndex) -> CoreResult<()> {
        let s = self.slot_mut(slot)?;
        if s.is_active() {
            return Err(CoreError::internal(format!("{} released before its event finished", slot)));
        }
        s.vacate();
        self.whiteboard.clear(slot)?;
        tracing::trace!(slot = %slot, "slot released");
        Ok(())
    }

    /// No task is running yet some slot still has work
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.in_flight() == 0 && self.slots.iter().any(EventSlot::is_active)
    }

    /// Describe every stalled slot
    #[must_use]
    pub fn stall_report(&self) -> StallReport {
        dump::stall_report(self)
    }

    /// Finalize every clone
    pub fn finalize(&mut self) -> Vec<(String, StatusCode)> {
        self.pool.finalize_all()
    }
}

impl std::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("slots", &self.slots.len())
            .field("active", &self.active_slots())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn slot_event(slot: &EventSlot) -> CoreResult<EventId> {
    slot.event
        .ok_or_else(|| CoreError::internal(format!("{} holds no event", slot.index)))
}

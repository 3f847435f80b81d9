//! Task execution on worker threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use avalanche_core::{AlgIndex, CoreError, EventId, SlotIndex, StatusCode};
use avalanche_plan::PrecedenceGraph;
use avalanche_store::{ConditionsStore, Partition};

use crate::algorithm::EventContext;
use crate::monitor::RunMonitor;
use crate::pool::LentClone;

/// One algorithm invocation, ready to run
#[derive(Debug)]
pub struct Task {
    /// Unique task id
    pub id: u64,
    /// Slot of the event
    pub slot: SlotIndex,
    /// Traversal within the slot
    pub traversal: usize,
    /// Algorithm
    pub alg: AlgIndex,
    /// Event
    pub event: EventId,
    /// View position, if inside a view
    pub view: Option<usize>,
    /// Store partition the algorithm sees
    pub store: Arc<Partition>,
    /// Clone on loan
    pub clone: LentClone,
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Returned a status
    Status(StatusCode),
    /// Returned an error
    Error(CoreError),
    /// Panicked
    Panic(String),
}

/// A finished invocation, sent back to the dispatcher
#[derive(Debug)]
pub struct Completion {
    /// Task id
    pub id: u64,
    /// Slot of the event
    pub slot: SlotIndex,
    /// Traversal within the slot
    pub traversal: usize,
    /// Algorithm
    pub alg: AlgIndex,
    /// Clone to return to the pool
    pub clone: LentClone,
    /// Result
    pub outcome: TaskOutcome,
    /// When the worker returned
    pub finished: Instant,
}

impl Task {
    /// Execute on the current thread
    ///
    /// A panic is caught and reported as an outcome; the clone is handed
    /// back either way.
    pub fn run(self, graph: &PrecedenceGraph, conditions: &ConditionsStore, monitor: &RunMonitor) -> Completion {
        let Task {
            id,
            slot,
            traversal,
            alg,
            event,
            view,
            store,
            mut clone,
        } = self;
        let desc = graph.algorithm(alg);
        monitor.task_started(id, &desc.name, slot, event, view);
        let _span = tracing::trace_span!("execute", alg = %desc.name, event = %event, slot = %slot).entered();

        let ctx = EventContext::new(event, slot, view, desc, &store, conditions);
        let instance = clone.instance();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| instance.execute(&ctx))) {
            Ok(Ok(status)) => TaskOutcome::Status(status),
            Ok(Err(err)) => TaskOutcome::Error(err),
            Err(payload) => TaskOutcome::Panic(panic_message(payload.as_ref())),
        };
        tracing::trace!(outcome = ?outcome, "task finished");

        Completion {
            id,
            slot,
            traversal,
            alg,
            clone,
            outcome,
            finished: Instant::now(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{AlgResult, Algorithm, AlgorithmRegistry};
    use crate::pool::AlgorithmResourcePool;
    use avalanche_plan::{AlgorithmDescriptor, CfSpec};

    struct Panics;

    impl Algorithm for Panics {
        fn execute(&mut self, _ctx: &EventContext<'_>) -> AlgResult {
            panic!("boom");
        }
    }

    #[test]
    fn test_panic_becomes_outcome() {
        let graph = Arc::new(
            PrecedenceGraph::build(
                vec![AlgorithmDescriptor::new("P")],
                Some(&CfSpec::seq(vec![CfSpec::alg("P")])),
                &[],
            )
            .unwrap(),
        );
        let mut registry = AlgorithmRegistry::new();
        registry.register_simple("P", || Panics);
        let mut pool = AlgorithmResourcePool::new(Arc::clone(&graph), registry).unwrap();
        let alg = AlgIndex::new(0);
        let clone = pool.acquire(alg).unwrap().unwrap();
        let monitor = RunMonitor::new(false);
        let task = Task {
            id: 1,
            slot: SlotIndex::new(0),
            traversal: 0,
            alg,
            event: EventId::new(1, 1),
            view: None,
            store: Arc::new(Partition::new("slot#0", 1)),
            clone,
        };

        let done = task.run(&graph, &ConditionsStore::new(), &monitor);
        assert_eq!(done.outcome, TaskOutcome::Panic("boom".to_string()));
        assert_eq!(monitor.in_flight().len(), 1);
        pool.discard(done.clone).unwrap();
    }
}

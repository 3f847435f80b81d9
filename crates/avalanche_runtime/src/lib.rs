//! Avalanche Runtime
//!
//! Runs events through the precedence graph. A single dispatcher thread owns
//! every state transition; algorithm tasks execute on a worker pool and hand
//! their results back through a completion channel. Several events are in
//! flight at once, one per slot, and views fan an event out into isolated
//! sub-slots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algorithm;
pub mod application;
pub mod control;
pub mod crunch;
pub mod dispatcher;
pub mod dump;
pub mod event;
pub mod event_loop;
pub mod executor;
pub mod monitor;
pub mod pool;
pub mod scheduler;
pub mod source;
pub mod summary;
pub mod views;
pub mod watchdog;

mod slot;
#[cfg(test)]
mod testing;

pub use algorithm::{AlgResult, Algorithm, AlgorithmFactory, AlgorithmRegistry, EventContext};
pub use application::Application;
pub use control::ControlFlowState;
pub use crunch::{register_builtins, CpuCruncher, CrunchSettings, CPU_CRUNCHER};
pub use dispatcher::Scheduler;
pub use dump::{ReportWriter, SharedBuffer, StallReport};
pub use event::{EventOutcome, EventRecord, FinishedEvent};
pub use event_loop::{EventLoopManager, StopHandle};
pub use executor::{Completion, Task, TaskOutcome};
pub use monitor::{AlgorithmStats, Metrics, RunMonitor, TaskInfo, TimelineEntry};
pub use pool::{AlgorithmResourcePool, LentClone, PoolError};
pub use scheduler::SchedulerCore;
pub use source::{CommitRecord, EventSink, EventSource, OutcomeLog, SinkOrdering, SyntheticSource, VecSource};
pub use summary::RunSummary;
pub use views::combine_views;
pub use watchdog::Watchdog;

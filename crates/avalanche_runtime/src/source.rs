//! Event sources and sinks.

use std::collections::VecDeque;

use avalanche_core::{CoreResult, EventId};
use avalanche_plan::{DataPath, SourceSettings};
use avalanche_store::DataObject;
use serde::Serialize;

use crate::event::{EventOutcome, EventRecord, FinishedEvent};

/// Supplies events to the event loop
pub trait EventSource: Send {
    /// Next event, `None` once exhausted
    ///
    /// # Errors
    ///
    /// `Source` if the event cannot be produced
    fn next_event(&mut self) -> CoreResult<Option<EventRecord>>;
}

/// Order in which a sink wants events committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkOrdering {
    /// Submission order; finished events wait in a reorder buffer
    InOrder,
    /// Completion order
    #[default]
    AnyOrder,
}

/// Receives finished events
pub trait EventSink: Send {
    /// Commit order this sink requires
    fn ordering(&self) -> SinkOrdering {
        SinkOrdering::AnyOrder
    }

    /// Commit one event
    ///
    /// # Errors
    ///
    /// `Sink` if the event cannot be written
    fn commit(&mut self, event: &FinishedEvent) -> CoreResult<()>;
}

/// Generates `count` events of one run, each pre-loaded with the
/// configured paths holding the event number
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    run: u32,
    next: u64,
    remaining: u64,
    provides: Vec<DataPath>,
}

impl SyntheticSource {
    /// Create from settings
    #[must_use]
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            run: settings.run,
            next: settings.first_event,
            remaining: settings.count,
            provides: settings.provides.clone(),
        }
    }
}

impl EventSource for SyntheticSource {
    fn next_event(&mut self) -> CoreResult<Option<EventRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let id = EventId::new(self.run, self.next);
        self.next += 1;
        let record = self
            .provides
            .iter()
            .fold(EventRecord::new(id), |r, p| r.with_object(p.clone(), DataObject::new(id.event)));
        Ok(Some(record))
    }
}

/// Replays a fixed list of events
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    events: VecDeque<EventRecord>,
}

impl VecSource {
    /// Create from records
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = EventRecord>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    /// Plain events `first..first+count` of one run
    #[must_use]
    pub fn range(run: u32, first: u64, count: u64) -> Self {
        Self::new((first..first + count).map(|e| EventRecord::new(EventId::new(run, e))))
    }
}

impl EventSource for VecSource {
    fn next_event(&mut self) -> CoreResult<Option<EventRecord>> {
        Ok(self.events.pop_front())
    }
}

/// One committed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    /// Position in submission order
    pub seq: u64,
    /// Event identity
    pub event: EventId,
    /// Verdict
    pub outcome: EventOutcome,
}

/// Sink that remembers every commit
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    ordering: SinkOrdering,
    commits: Vec<CommitRecord>,
}

impl OutcomeLog {
    /// Sink committing in completion order
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink committing in submission order
    #[must_use]
    pub fn in_order() -> Self {
        Self {
            ordering: SinkOrdering::InOrder,
            commits: Vec::new(),
        }
    }

    /// Commits so far
    #[must_use]
    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }
}

impl EventSink for OutcomeLog {
    fn ordering(&self) -> SinkOrdering {
        self.ordering
    }

    fn commit(&mut self, event: &FinishedEvent) -> CoreResult<()> {
        tracing::debug!(event = %event.event, outcome = %event.outcome, "event committed");
        self.commits.push(CommitRecord {
            seq: event.seq,
            event: event.event,
            outcome: event.outcome,
        });
        Ok(())
    }
}

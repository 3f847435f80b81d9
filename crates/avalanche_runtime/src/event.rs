//! Events entering and leaving the scheduler.

use std::sync::Arc;
use std::time::Duration;

use avalanche_core::{AlgState, CoreError, EventId, SlotIndex};
use avalanche_plan::DataPath;
use avalanche_store::{DataObject, Partition};
use serde::Serialize;

/// An event delivered by a source, with the objects it pre-populates
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Event identity
    pub id: EventId,
    /// Objects written into the slot before any algorithm runs
    pub objects: Vec<(DataPath, DataObject)>,
}

impl EventRecord {
    /// Event without pre-populated data
    #[must_use]
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            objects: Vec::new(),
        }
    }

    /// Add a pre-populated object
    #[must_use]
    pub fn with_object(mut self, path: DataPath, object: DataObject) -> Self {
        self.objects.push((path, object));
        self
    }
}

/// Final verdict on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    /// Root decided TRUE
    Accepted,
    /// Root decided FALSE
    Rejected,
    /// At least one algorithm failed
    Failed,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        })
    }
}

/// An event whose processing is complete
///
/// The slot stays reserved, with its store intact, until the event loop
/// releases it after the sink has committed the event.
#[derive(Debug, Clone)]
pub struct FinishedEvent {
    /// Slot the event ran in
    pub slot: SlotIndex,
    /// Event identity
    pub event: EventId,
    /// Position in submission order
    pub seq: u64,
    /// Verdict
    pub outcome: EventOutcome,
    /// Errors raised while processing the event
    pub failures: Vec<CoreError>,
    /// Whether a failure must stop the job under stop-on-error
    pub fatal: bool,
    /// Final state of every algorithm of the main traversal
    pub states: Vec<(String, AlgState)>,
    /// Main store partition
    pub store: Arc<Partition>,
    /// Store partitions of the views, in creation order
    pub views: Vec<Arc<Partition>>,
    /// Wall time from slot assignment to completion
    pub elapsed: Duration,
}

impl FinishedEvent {
    /// Final state of an algorithm by name
    #[must_use]
    pub fn state(&self, alg: &str) -> Option<AlgState> {
        self.states.iter().find(|(name, _)| name == alg).map(|(_, s)| *s)
    }
}

//! Identifiers for jobs, events, slots, algorithms and control-flow nodes.
//!
//! Dense indices (`AlgIndex`, `NodeIndex`, `SlotIndex`) are assigned once at
//! configuration time and used to address per-slot state vectors directly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier - identifies one scheduler run (one process invocation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random JobId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

/// Event identifier - `(run, event)` as delivered by the event source
///
/// Ordering is by run first, then event number, which is also the order
/// used for intervals of validity in the conditions store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    /// Run number
    pub run: u32,
    /// Event number within the run
    pub event: u64,
}

impl EventId {
    /// Create a new event id
    #[must_use]
    pub const fn new(run: u32, event: u64) -> Self {
        Self { run, event }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}/e{}", self.run, self.event)
    }
}

macro_rules! dense_index {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Create from a raw index
            #[must_use]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Create from a `usize` position
            ///
            /// Positions beyond `u32::MAX` saturate; configurations never get there.
            #[must_use]
            pub fn from_usize(index: usize) -> Self {
                Self(u32::try_from(index).unwrap_or(u32::MAX))
            }

            /// Raw index
            #[must_use]
            pub const fn as_u32(&self) -> u32 {
                self.0
            }

            /// Index usable for slice addressing
            #[must_use]
            pub const fn as_usize(&self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

dense_index!(
    /// Algorithm index - position of the algorithm in declaration order
    AlgIndex,
    "alg#"
);

dense_index!(
    /// Control-flow node index - position in the flattened control-flow arena
    NodeIndex,
    "node#"
);

dense_index!(
    /// Event slot index - one of the N slots allocated at startup
    SlotIndex,
    "slot#"
);

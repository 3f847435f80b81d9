//! Avalanche Store
//!
//! The per-event Whiteboard with sub-slot partitions for views, and the
//! slot-independent conditions store. Objects are immutable once written.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conditions;
pub mod error;
pub mod object;
pub mod partition;
pub mod views;

pub use conditions::{ConditionsStore, IovRange};
pub use error::StoreError;
pub use object::{DataObject, ReadHandle, WriteHandle};
pub use partition::{Partition, Whiteboard, DEFAULT_SHARDS};
pub use views::{ViewSeed, ViewSet};

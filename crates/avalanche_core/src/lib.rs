//! Avalanche Core Types
//!
//! Identifiers, algorithm status codes, per-event state enums and the
//! error taxonomy shared by every layer of the scheduler. No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod status;

// Re-exports
pub use error::{CoreError, CoreResult, ExitCodes};
pub use id::{AlgIndex, EventId, JobId, NodeIndex, SlotIndex};
pub use status::{AlgState, Decision, StatusCode};

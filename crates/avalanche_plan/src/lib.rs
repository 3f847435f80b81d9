//! Avalanche Planner
//!
//! Turns a declarative job description (algorithm descriptors plus a
//! control-flow tree) into the immutable [`PrecedenceGraph`] the scheduler
//! consults on every wake-up. All configuration errors are found here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod descriptor;
pub mod graph;
pub mod path;
pub mod render;
pub mod validate;

pub use config::{ConfigError, ErrorPolicy, EventLoopSettings, JobConfig, SchedulerSettings, SourceSettings};
pub use control::{CfKind, CfNode, CfNodeKind, CfSpec, NodeFlags, NodeSpec};
pub use descriptor::{AlgorithmDescriptor, Realm, ViewCombine, ViewSpec};
pub use graph::{PrecedenceGraph, PriorityKey, Producer};
pub use path::DataPath;
pub use validate::{configuration_error, ValidationError, Validator};

//! Store errors.

use avalanche_core::{CoreError, SlotIndex};
use avalanche_plan::DataPath;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Path already written in this partition
    DuplicateKey { path: DataPath },
    /// Path absent from the partition and all its parents
    NotFound { path: DataPath },
    /// Object stored under a different type than requested
    TypeMismatch {
        path: DataPath,
        expected: &'static str,
        found: &'static str,
    },
    /// A sub-slot tried to shadow a path visible from a parent partition
    IsolationViolation { path: DataPath },
    /// A conditions object overlaps an existing interval of validity
    OverlappingIov { path: DataPath, iov: String },
    /// Slot index outside the allocated range
    UnknownSlot { slot: SlotIndex },
    /// A lock was poisoned by a panicking writer
    Poisoned { what: &'static str },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey { path } => write!(f, "{} already present", path),
            Self::NotFound { path } => write!(f, "{} not found", path),
            Self::TypeMismatch { path, expected, found } => {
                write!(f, "{} holds {} but {} was requested", path, found, expected)
            }
            Self::IsolationViolation { path } => {
                write!(f, "{} is visible from a parent partition and cannot be shadowed", path)
            }
            Self::OverlappingIov { path, iov } => {
                write!(f, "{} already has an object valid in {}", path, iov)
            }
            Self::UnknownSlot { slot } => write!(f, "{} is not allocated", slot),
            Self::Poisoned { what } => write!(f, "{} lock poisoned", what),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { path } | StoreError::OverlappingIov { path, .. } => {
                CoreError::DuplicateKey {
                    path: path.to_string(),
                }
            }
            StoreError::NotFound { path } => CoreError::NotFound {
                kind: "data object".to_string(),
                id: path.to_string(),
            },
            StoreError::IsolationViolation { ref path } => CoreError::IsolationViolation {
                path: path.to_string(),
                reason: err.to_string(),
            },
            StoreError::TypeMismatch { .. } | StoreError::UnknownSlot { .. } | StoreError::Poisoned { .. } => {
                CoreError::internal(err)
            }
        }
    }
}

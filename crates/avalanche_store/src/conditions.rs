//! Conditions store.
//!
//! Holds objects that stay constant over a range of runs. One writer per
//! path (its conditions producer), many readers across slots.

use std::collections::HashMap;
use std::sync::RwLock;

use avalanche_core::EventId;
use avalanche_plan::DataPath;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::object::DataObject;

/// Inclusive range of runs over which a conditions object is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IovRange {
    /// First valid run
    pub first_run: u32,
    /// Last valid run
    pub last_run: u32,
}

impl IovRange {
    /// Range covering a single run
    #[must_use]
    pub const fn run(run: u32) -> Self {
        Self {
            first_run: run,
            last_run: run,
        }
    }

    /// Range covering `first..=last`
    #[must_use]
    pub const fn runs(first: u32, last: u32) -> Self {
        Self {
            first_run: first,
            last_run: last,
        }
    }

    /// Whether the event falls in the range
    #[must_use]
    pub const fn contains(&self, event: EventId) -> bool {
        self.first_run <= event.run && event.run <= self.last_run
    }

    /// Whether two ranges share a run
    #[must_use]
    pub const fn overlaps(&self, other: &IovRange) -> bool {
        self.first_run <= other.last_run && other.first_run <= self.last_run
    }
}

impl std::fmt::Display for IovRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[run {}..={}]", self.first_run, self.last_run)
    }
}

/// Slot-independent store of conditions objects
#[derive(Debug, Default)]
pub struct ConditionsStore {
    entries: RwLock<HashMap<DataPath, Vec<(IovRange, DataObject)>>>,
}

impl ConditionsStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object valid over `iov`
    ///
    /// # Errors
    ///
    /// `OverlappingIov` if another object for the path covers part of `iov`
    pub fn put(&self, path: DataPath, iov: IovRange, object: DataObject) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Poisoned { what: "conditions" })?;
        let ranges = entries.entry(path.clone()).or_default();
        if let Some((existing, _)) = ranges.iter().find(|(r, _)| r.overlaps(&iov)) {
            return Err(StoreError::OverlappingIov {
                path,
                iov: existing.to_string(),
            });
        }
        tracing::debug!(path = %path, iov = %iov, "conditions object stored");
        ranges.push((iov, object));
        Ok(())
    }

    /// Object valid for an event
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn get(&self, path: &DataPath, event: EventId) -> Result<Option<DataObject>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned { what: "conditions" })?;
        Ok(entries.get(path).and_then(|ranges| {
            ranges
                .iter()
                .find(|(r, _)| r.contains(event))
                .map(|(_, o)| o.clone())
        }))
    }

    /// Whether an object is valid for an event
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn contains(&self, path: &DataPath, event: EventId) -> Result<bool, StoreError> {
        Ok(self.get(path, event)?.is_some())
    }

    /// Whether every path is valid for an event
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn all_valid<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a DataPath>,
        event: EventId,
    ) -> Result<bool, StoreError> {
        for path in paths {
            if !self.contains(path, event)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of stored objects across all paths
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn len(&self) -> Result<usize, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned { what: "conditions" })?;
        Ok(entries.values().map(Vec::len).sum())
    }

    /// Whether the store is empty
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iov_lookup() {
        let store = ConditionsStore::new();
        let align = DataPath::parse("/Conditions/Align").unwrap();
        store.put(align.clone(), IovRange::runs(1, 2), DataObject::new(0.5_f64)).unwrap();
        store.put(align.clone(), IovRange::run(3), DataObject::new(0.7_f64)).unwrap();

        let v = |run| {
            store
                .get(&align, EventId::new(run, 1))
                .unwrap()
                .map(|o| *o.downcast::<f64>().unwrap())
        };
        assert_eq!(v(1), Some(0.5));
        assert_eq!(v(2), Some(0.5));
        assert_eq!(v(3), Some(0.7));
        assert_eq!(v(4), None);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_overlap_rejected() {
        let store = ConditionsStore::new();
        let path = DataPath::parse("/Conditions/Calib").unwrap();
        store.put(path.clone(), IovRange::runs(1, 5), DataObject::new(1_u8)).unwrap();
        let err = store.put(path.clone(), IovRange::run(5), DataObject::new(2_u8)).unwrap_err();
        assert!(matches!(err, StoreError::OverlappingIov { .. }));
    }

    #[test]
    fn test_all_valid() {
        let store = ConditionsStore::new();
        let a = DataPath::parse("/Conditions/A").unwrap();
        let b = DataPath::parse("/Conditions/B").unwrap();
        store.put(a.clone(), IovRange::run(1), DataObject::new(())).unwrap();
        let event = EventId::new(1, 42);
        assert!(store.all_valid([&a], event).unwrap());
        assert!(!store.all_valid([&a, &b], event).unwrap());
    }
}

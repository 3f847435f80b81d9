//! Whiteboard partitions.
//!
//! Each event slot owns one [`Partition`]. Views get child partitions that
//! read through to their parent but write locally. Entries are spread over
//! independently locked shards so writers of different paths never contend
//! on one lock.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::sync::{Arc, RwLock};

use avalanche_core::{NodeIndex, SlotIndex};
use avalanche_plan::DataPath;

use crate::error::StoreError;
use crate::object::DataObject;

/// Shards per partition unless configured otherwise
pub const DEFAULT_SHARDS: usize = 16;

type Shard = RwLock<HashMap<DataPath, DataObject>>;

/// Store partition of one slot or sub-slot
pub struct Partition {
    label: String,
    parent: Option<Arc<Partition>>,
    shards: Box<[Shard]>,
    done: RwLock<HashSet<DataPath>>,
    hasher: ahash::RandomState,
}

impl Partition {
    /// Create a root partition
    #[must_use]
    pub fn new(label: impl Into<String>, shards: usize) -> Self {
        Self {
            label: label.into(),
            parent: None,
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
            done: RwLock::new(HashSet::new()),
            hasher: ahash::RandomState::with_seeds(0x5eed, 0xa1a, 0xc4e, 0x5107),
        }
    }

    /// Create a child partition reading through to `parent`
    #[must_use]
    pub fn child(parent: &Arc<Partition>, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: Some(Arc::clone(parent)),
            shards: (0..parent.shards.len())
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            done: RwLock::new(HashSet::new()),
            hasher: parent.hasher.clone(),
        })
    }

    /// Diagnostic label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Parent partition
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Partition>> {
        self.parent.as_ref()
    }

    /// Nesting depth; 0 for slot partitions
    #[must_use]
    pub fn depth(&self) -> usize {
        std::iter::successors(self.parent.as_deref(), |p| p.parent.as_deref()).count()
    }

    fn shard(&self, path: &DataPath) -> &Shard {
        let index = self.hasher.hash_one(path) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Store an object
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the path is already present here, `IsolationViolation`
    /// if a parent partition already exposes it
    pub fn put(&self, path: DataPath, object: DataObject) -> Result<(), StoreError> {
        let mut ancestor = self.parent.as_deref();
        while let Some(p) = ancestor {
            if p.contains_local(&path)? {
                return Err(StoreError::IsolationViolation { path });
            }
            ancestor = p.parent.as_deref();
        }

        let mut shard = self
            .shard(&path)
            .write()
            .map_err(|_| StoreError::Poisoned { what: "partition shard" })?;
        if shard.contains_key(&path) {
            return Err(StoreError::DuplicateKey { path });
        }
        tracing::trace!(partition = %self.label, path = %path, "put");
        shard.insert(path, object);
        Ok(())
    }

    /// Look a path up here, then in the parents
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn get(&self, path: &DataPath) -> Result<Option<DataObject>, StoreError> {
        let mut current = Some(self);
        while let Some(p) = current {
            if let Some(object) = p.get_local(path)? {
                return Ok(Some(object));
            }
            current = p.parent.as_deref();
        }
        Ok(None)
    }

    /// Look a path up in this partition only
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn get_local(&self, path: &DataPath) -> Result<Option<DataObject>, StoreError> {
        let shard = self
            .shard(path)
            .read()
            .map_err(|_| StoreError::Poisoned { what: "partition shard" })?;
        Ok(shard.get(path).cloned())
    }

    /// Whether the path is visible from this partition
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn contains(&self, path: &DataPath) -> Result<bool, StoreError> {
        Ok(self.get(path)?.is_some())
    }

    /// Whether the path was written to this partition
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn contains_local(&self, path: &DataPath) -> Result<bool, StoreError> {
        let shard = self
            .shard(path)
            .read()
            .map_err(|_| StoreError::Poisoned { what: "partition shard" })?;
        Ok(shard.contains_key(path))
    }

    /// Record that the producer of `path` has finished in this partition
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn mark_done(&self, path: DataPath) -> Result<(), StoreError> {
        self.done
            .write()
            .map_err(|_| StoreError::Poisoned { what: "producer flags" })?
            .insert(path);
        Ok(())
    }

    /// Whether the producer of `path` has finished here or in a parent
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn is_done(&self, path: &DataPath) -> Result<bool, StoreError> {
        let mut current = Some(self);
        while let Some(p) = current {
            let done = p
                .done
                .read()
                .map_err(|_| StoreError::Poisoned { what: "producer flags" })?;
            if done.contains(path) {
                return Ok(true);
            }
            current = p.parent.as_deref();
        }
        Ok(false)
    }

    /// Paths written to this partition, sorted
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn paths(&self) -> Result<Vec<DataPath>, StoreError> {
        let mut paths = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard
                .read()
                .map_err(|_| StoreError::Poisoned { what: "partition shard" })?;
            paths.extend(shard.keys().cloned());
        }
        paths.sort();
        Ok(paths)
    }

    /// Number of objects written to this partition
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn len(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard
                .read()
                .map_err(|_| StoreError::Poisoned { what: "partition shard" })?
                .len();
        }
        Ok(total)
    }

    /// Whether nothing was written to this partition
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Drop every object and producer flag
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn clear(&self) -> Result<(), StoreError> {
        for shard in self.shards.iter() {
            shard
                .write()
                .map_err(|_| StoreError::Poisoned { what: "partition shard" })?
                .clear();
        }
        self.done
            .write()
            .map_err(|_| StoreError::Poisoned { what: "producer flags" })?
            .clear();
        Ok(())
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("label", &self.label)
            .field("depth", &self.depth())
            .finish()
    }
}

/// The event store: one partition per slot
#[derive(Debug)]
pub struct Whiteboard {
    partitions: Vec<Arc<Partition>>,
}

impl Whiteboard {
    /// Allocate `slots` partitions with `shards` shards each
    #[must_use]
    pub fn new(slots: usize, shards: usize) -> Self {
        Self {
            partitions: (0..slots)
                .map(|i| Arc::new(Partition::new(SlotIndex::from_usize(i).to_string(), shards)))
                .collect(),
        }
    }

    /// Number of slots
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition of a slot
    #[must_use]
    pub fn partition(&self, slot: SlotIndex) -> Option<&Arc<Partition>> {
        self.partitions.get(slot.as_usize())
    }

    /// Store into a slot
    ///
    /// # Errors
    ///
    /// See [`Partition::put`]
    pub fn put(&self, slot: SlotIndex, path: DataPath, object: DataObject) -> Result<(), StoreError> {
        self.slot(slot)?.put(path, object)
    }

    /// Read from a slot
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn get(&self, slot: SlotIndex, path: &DataPath) -> Result<Option<DataObject>, StoreError> {
        self.slot(slot)?.get(path)
    }

    /// Whether a slot holds a path
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn contains(&self, slot: SlotIndex, path: &DataPath) -> Result<bool, StoreError> {
        self.slot(slot)?.contains(path)
    }

    /// Empty a slot for reuse
    ///
    /// # Errors
    ///
    /// Returns an error only if a lock is poisoned
    pub fn clear(&self, slot: SlotIndex) -> Result<(), StoreError> {
        self.slot(slot)?.clear()
    }

    /// Create the partition of one view below `parent`
    #[must_use]
    pub fn create_sub_slot(parent: &Arc<Partition>, node: NodeIndex, view: usize) -> Arc<Partition> {
        Partition::child(parent, format!("{}/{}[{}]", parent.label(), node, view))
    }

    fn slot(&self, slot: SlotIndex) -> Result<&Arc<Partition>, StoreError> {
        self.partitions
            .get(slot.as_usize())
            .ok_or(StoreError::UnknownSlot { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> DataPath {
        DataPath::parse(p).unwrap()
    }

    #[test]
    fn test_put_get_duplicate() {
        let store = Partition::new("slot#0", 4);
        store.put(path("/x"), DataObject::new(1_u32)).unwrap();
        assert!(store.contains(&path("/x")).unwrap());
        assert!(!store.contains(&path("/y")).unwrap());
        assert_eq!(*store.get(&path("/x")).unwrap().unwrap().downcast::<u32>().unwrap(), 1);
        assert_eq!(
            store.put(path("/x"), DataObject::new(2_u32)),
            Err(StoreError::DuplicateKey { path: path("/x") })
        );
    }

    #[test]
    fn test_sub_slot_reads_through_and_writes_locally() {
        let parent = Arc::new(Partition::new("slot#0", 4));
        parent.put(path("/seed"), DataObject::new("event")).unwrap();
        let view = Whiteboard::create_sub_slot(&parent, NodeIndex::new(3), 1);
        assert_eq!(view.label(), "slot#0/node#3[1]");
        assert_eq!(view.depth(), 1);

        assert!(view.contains(&path("/seed")).unwrap());
        view.put(path("/match"), DataObject::new(true)).unwrap();
        assert!(view.contains_local(&path("/match")).unwrap());
        assert!(!parent.contains(&path("/match")).unwrap());

        assert_eq!(
            view.put(path("/seed"), DataObject::new("shadow")),
            Err(StoreError::IsolationViolation { path: path("/seed") })
        );
    }

    #[test]
    fn test_sibling_views_are_isolated() {
        let parent = Arc::new(Partition::new("slot#0", 2));
        let a = Whiteboard::create_sub_slot(&parent, NodeIndex::new(1), 0);
        let b = Whiteboard::create_sub_slot(&parent, NodeIndex::new(1), 1);
        a.put(path("/pt"), DataObject::new(1.0_f64)).unwrap();
        b.put(path("/pt"), DataObject::new(2.0_f64)).unwrap();
        assert_eq!(*a.get(&path("/pt")).unwrap().unwrap().downcast::<f64>().unwrap(), 1.0);
        assert_eq!(*b.get(&path("/pt")).unwrap().unwrap().downcast::<f64>().unwrap(), 2.0);
    }

    #[test]
    fn test_producer_flags_fall_through() {
        let parent = Arc::new(Partition::new("slot#0", 2));
        parent.mark_done(path("/x")).unwrap();
        let view = Partition::child(&parent, "v");
        assert!(view.is_done(&path("/x")).unwrap());
        assert!(!view.is_done(&path("/y")).unwrap());
    }

    #[test]
    fn test_whiteboard_clear() {
        let board = Whiteboard::new(2, DEFAULT_SHARDS);
        let s0 = SlotIndex::new(0);
        let s1 = SlotIndex::new(1);
        board.put(s0, path("/x"), DataObject::new(1_u8)).unwrap();
        board.put(s1, path("/x"), DataObject::new(2_u8)).unwrap();
        board.clear(s0).unwrap();
        assert!(!board.contains(s0, &path("/x")).unwrap());
        assert!(board.contains(s1, &path("/x")).unwrap());
        assert_eq!(board.partition(s1).unwrap().paths().unwrap(), vec![path("/x")]);
        assert!(board.put(SlotIndex::new(9), path("/x"), DataObject::new(0_u8)).is_err());
    }

    #[test]
    fn test_concurrent_writers_different_paths() {
        let store = Arc::new(Partition::new("slot#0", DEFAULT_SHARDS));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .put(path(&format!("/t{}/o{}", t, i)), DataObject::new(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 400);
    }
}

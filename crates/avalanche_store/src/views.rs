//! View collections written by view makers.

use avalanche_plan::DataPath;

use crate::error::StoreError;
use crate::object::DataObject;
use crate::partition::Partition;

/// Objects seeded into one view
#[derive(Debug, Clone, Default)]
pub struct ViewSeed {
    objects: Vec<(DataPath, DataObject)>,
}

impl ViewSeed {
    /// Empty seed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object to the seed
    #[must_use]
    pub fn with(mut self, path: DataPath, object: DataObject) -> Self {
        self.objects.push((path, object));
        self
    }

    /// Paths carried by the seed
    pub fn paths(&self) -> impl Iterator<Item = &DataPath> {
        self.objects.iter().map(|(p, _)| p)
    }

    /// Write the seed into a fresh view partition
    ///
    /// # Errors
    ///
    /// Returns the first store error
    pub fn populate(&self, view: &Partition) -> Result<(), StoreError> {
        for (path, object) in &self.objects {
            view.put(path.clone(), object.clone())?;
        }
        Ok(())
    }
}

/// Every view one maker created for one event
///
/// Stored at the maker's collection path; the scheduler reads it back when
/// the maker completes and opens one sub-slot per seed.
#[derive(Debug, Clone, Default)]
pub struct ViewSet {
    seeds: Vec<ViewSeed>,
}

impl ViewSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a view
    pub fn push(&mut self, seed: ViewSeed) {
        self.seeds.push(seed);
    }

    /// Number of views
    #[must_use]
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Whether no view was created
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Seeds in creation order
    #[must_use]
    pub fn seeds(&self) -> &[ViewSeed] {
        &self.seeds
    }
}

impl FromIterator<ViewSeed> for ViewSet {
    fn from_iter<I: IntoIterator<Item = ViewSeed>>(iter: I) -> Self {
        Self {
            seeds: iter.into_iter().collect(),
        }
    }
}

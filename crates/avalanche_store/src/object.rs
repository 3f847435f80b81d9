//! Type-erased data objects and typed handles.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use avalanche_plan::DataPath;

use crate::error::StoreError;
use crate::partition::Partition;

/// Immutable payload stored under a path
///
/// Cloning shares the payload.
#[derive(Clone)]
pub struct DataObject {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl DataObject {
    /// Wrap a value
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Name of the stored type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the payload is a `T`
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Shared reference to the payload as `T`
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataObject").field("type", &self.type_name).finish()
    }
}

/// Typed read access to one path
pub struct ReadHandle<T> {
    path: DataPath,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ReadHandle<T> {
    /// Create a handle
    #[must_use]
    pub fn new(path: DataPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Handled path
    #[must_use]
    pub fn path(&self) -> &DataPath {
        &self.path
    }

    /// Read through the partition and its parents
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `TypeMismatch`
    pub fn get(&self, store: &Partition) -> Result<Arc<T>, StoreError> {
        let object = store.get(&self.path)?.ok_or_else(|| StoreError::NotFound {
            path: self.path.clone(),
        })?;
        object.downcast::<T>().ok_or(StoreError::TypeMismatch {
            path: self.path.clone(),
            expected: std::any::type_name::<T>(),
            found: object.type_name(),
        })
    }
}

/// Typed write access to one path
pub struct WriteHandle<T> {
    path: DataPath,
    _marker: PhantomData<fn(T)>,
}

impl<T: Any + Send + Sync> WriteHandle<T> {
    /// Create a handle
    #[must_use]
    pub fn new(path: DataPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Handled path
    #[must_use]
    pub fn path(&self) -> &DataPath {
        &self.path
    }

    /// Write into the partition
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` or `IsolationViolation`
    pub fn put(&self, store: &Partition, value: T) -> Result<(), StoreError> {
        store.put(self.path.clone(), DataObject::new(value))
    }
}

impl<T> fmt::Debug for ReadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadHandle({})", self.path)
    }
}

impl<T> fmt::Debug for WriteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteHandle({})", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Track {
        pt: f64,
    }

    #[test]
    fn test_downcast() {
        let obj = DataObject::new(Track { pt: 3.5 });
        assert!(obj.is::<Track>());
        assert!(obj.type_name().ends_with("Track"));
        assert_eq!(obj.downcast::<Track>().unwrap().pt, 3.5);
        assert!(obj.downcast::<u32>().is_none());
    }

    #[test]
    fn test_typed_handles() {
        let store = Partition::new("slot#0", 4);
        let path = DataPath::parse("/Event/Tracks").unwrap();
        let write = WriteHandle::<Vec<Track>>::new(path.clone());
        let read = ReadHandle::<Vec<Track>>::new(path.clone());

        assert!(matches!(read.get(&store), Err(StoreError::NotFound { .. })));
        write.put(&store, vec![Track { pt: 1.0 }]).unwrap();
        assert_eq!(read.get(&store).unwrap().len(), 1);
        assert!(matches!(
            write.put(&store, Vec::new()),
            Err(StoreError::DuplicateKey { .. })
        ));

        let wrong = ReadHandle::<String>::new(path);
        assert!(matches!(wrong.get(&store), Err(StoreError::TypeMismatch { .. })));
    }
}

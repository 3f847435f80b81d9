//! The algorithm interface, its registry and the per-task context.

use std::any::Any;
use std::sync::Arc;

use avalanche_core::{CoreError, CoreResult, EventId, SlotIndex, StatusCode};
use avalanche_plan::{AlgorithmDescriptor, DataPath, Realm};
use avalanche_store::{ConditionsStore, DataObject, IovRange, Partition, StoreError};
use indexmap::IndexMap;

/// Result of one algorithm invocation
///
/// An `Err` is reported as a failure carrying the error's message.
pub type AlgResult = CoreResult<StatusCode>;

/// A unit of work scheduled once per event
///
/// Implementations hold no per-event state between invocations. A clone is
/// owned by exactly one task at a time, so `execute` takes `&mut self`.
pub trait Algorithm: Send {
    /// Called once per clone before the first event
    fn initialize(&mut self) -> StatusCode {
        StatusCode::Success
    }

    /// Process one event
    fn execute(&mut self, ctx: &EventContext<'_>) -> AlgResult;

    /// Called once per clone at shutdown
    fn finalize(&mut self) -> StatusCode {
        StatusCode::Success
    }
}

/// Constructor registered for an algorithm type
pub type AlgorithmFactory =
    Arc<dyn Fn(&AlgorithmDescriptor) -> CoreResult<Box<dyn Algorithm>> + Send + Sync>;

/// Maps type names to constructors
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    factories: IndexMap<String, AlgorithmFactory>,
}

impl AlgorithmRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for the type
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&AlgorithmDescriptor) -> CoreResult<Box<dyn Algorithm>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    /// Register a type whose clones are built from a closure ignoring the descriptor
    pub fn register_simple<A, F>(&mut self, type_name: impl Into<String>, make: F)
    where
        A: Algorithm + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.register(type_name, move |_| Ok(Box::new(make()) as Box<dyn Algorithm>));
    }

    /// Whether a type is registered
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a clone for a descriptor
    ///
    /// # Errors
    ///
    /// `NotFound` for an unregistered type, or whatever the constructor returns
    pub fn create(&self, desc: &AlgorithmDescriptor) -> CoreResult<Box<dyn Algorithm>> {
        let factory = self
            .factories
            .get(&desc.type_name)
            .ok_or_else(|| CoreError::NotFound {
                kind: "algorithm type".to_string(),
                id: desc.type_name.clone(),
            })?;
        factory(desc)
    }

    /// Check that every descriptor has a registered type
    ///
    /// # Errors
    ///
    /// `Configuration` listing every unknown type
    pub fn check(&self, descriptors: &[AlgorithmDescriptor]) -> CoreResult<()> {
        let errors: Vec<String> = descriptors
            .iter()
            .filter(|d| !self.contains(&d.type_name))
            .map(|d| format!("algorithm '{}' has unregistered type '{}'", d.name, d.type_name))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Configuration { errors })
        }
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// What an algorithm sees while executing
pub struct EventContext<'a> {
    event: EventId,
    slot: SlotIndex,
    view: Option<usize>,
    desc: &'a AlgorithmDescriptor,
    store: &'a Partition,
    conditions: &'a ConditionsStore,
}

impl<'a> EventContext<'a> {
    /// Assemble a context
    #[must_use]
    pub fn new(
        event: EventId,
        slot: SlotIndex,
        view: Option<usize>,
        desc: &'a AlgorithmDescriptor,
        store: &'a Partition,
        conditions: &'a ConditionsStore,
    ) -> Self {
        Self {
            event,
            slot,
            view,
            desc,
            store,
            conditions,
        }
    }

    /// Event being processed
    #[must_use]
    pub fn event(&self) -> EventId {
        self.event
    }

    /// Slot holding the event
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Position of the view being processed, `None` outside views
    #[must_use]
    pub fn view_index(&self) -> Option<usize> {
        self.view
    }

    /// Descriptor of the running algorithm
    #[must_use]
    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        self.desc
    }

    /// Name of the running algorithm
    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Store partition of the running traversal
    #[must_use]
    pub fn store(&self) -> &Partition {
        self.store
    }

    fn fault(&self, path: &DataPath, reason: impl Into<String>) -> CoreError {
        CoreError::DataFault {
            alg: self.desc.name.clone(),
            event: self.event,
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    fn from_store(&self, path: &DataPath, err: StoreError) -> CoreError {
        match err {
            StoreError::IsolationViolation { .. } => CoreError::IsolationViolation {
                path: path.to_string(),
                reason: format!("{} on event {}: {}", self.desc.name, self.event, err),
            },
            StoreError::Poisoned { .. } | StoreError::UnknownSlot { .. } => err.into(),
            other => self.fault(path, other.to_string()),
        }
    }

    /// Raw object at a path; conditions paths are resolved for this event
    ///
    /// # Errors
    ///
    /// `DataFault` if the path is absent
    pub fn get_object(&self, path: &DataPath) -> CoreResult<DataObject> {
        let found = if path.is_conditions() {
            self.conditions.get(path, self.event)
        } else {
            self.store.get(path)
        };
        found
            .map_err(|e| self.from_store(path, e))?
            .ok_or_else(|| self.fault(path, "is neither pre-populated nor produced"))
    }

    /// Typed object at a path
    ///
    /// # Errors
    ///
    /// `DataFault` if the path is absent or holds another type
    pub fn get<T: Any + Send + Sync>(&self, path: &DataPath) -> CoreResult<Arc<T>> {
        let object = self.get_object(path)?;
        object.downcast::<T>().ok_or_else(|| {
            self.fault(
                path,
                format!("holds {} but {} was requested", object.type_name(), std::any::type_name::<T>()),
            )
        })
    }

    /// Whether a path is visible
    #[must_use]
    pub fn contains(&self, path: &DataPath) -> bool {
        self.get_object(path).is_ok()
    }

    /// Store an already wrapped object under one of the declared outputs
    ///
    /// Conditions producers write to the conditions store with validity
    /// limited to the current run.
    ///
    /// # Errors
    ///
    /// `DataFault` for an undeclared output or a duplicate write,
    /// `IsolationViolation` when a view shadows parent data
    pub fn put_object(&self, path: &DataPath, object: DataObject) -> CoreResult<()> {
        if !self.desc.produced_paths().any(|p| p == path) {
            return Err(self.fault(path, "is not a declared output"));
        }
        let stored = match self.desc.realm {
            Realm::Conditions => self
                .conditions
                .put(path.clone(), IovRange::run(self.event.run), object),
            Realm::Event => self.store.put(path.clone(), object),
        };
        stored.map_err(|e| self.from_store(path, e))
    }

    /// Store a value under one of the declared outputs
    ///
    /// # Errors
    ///
    /// See [`EventContext::put_object`]
    pub fn put<T: Any + Send + Sync>(&self, path: &DataPath, value: T) -> CoreResult<()> {
        self.put_object(path, DataObject::new(value))
    }
}

//! Algorithm resource pool.
//!
//! Owns every algorithm clone. A clone is lent to exactly one task at a
//! time and returned on completion. Clones beyond the first are created
//! lazily, up to the algorithm's effective cardinality. Exclusive resource
//! tags are taken in lexicographic order and all-or-nothing, so two tasks
//! can never wait on each other's tags.

use std::sync::Arc;

use avalanche_core::{AlgIndex, CoreError, CoreResult, StatusCode};
use avalanche_plan::PrecedenceGraph;
use indexmap::IndexMap;

use crate::algorithm::{Algorithm, AlgorithmRegistry};

/// Pool error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The registry has no constructor for a type
    #[error("algorithm '{alg}' has unregistered type '{type_name}'")]
    UnknownType {
        /// Algorithm name
        alg: String,
        /// Requested type
        type_name: String,
    },
    /// A freshly created clone failed to initialize
    #[error("algorithm '{alg}' failed to initialize: {status:?}")]
    InitializeFailed {
        /// Algorithm name
        alg: String,
        /// Status returned by `initialize`
        status: StatusCode,
    },
    /// Tags were requested out of order
    #[error("tag '{tag}' requested after '{previous}'")]
    OutOfOrder {
        /// Offending tag
        tag: String,
        /// Tag that preceded it
        previous: String,
    },
    /// A tag was released by an algorithm that does not hold it
    #[error("tag '{tag}' is not held by '{alg}'")]
    NotHeld {
        /// Tag
        tag: String,
        /// Algorithm that released it
        alg: String,
    },
    /// A clone was returned that the pool did not lend
    #[error("clone of '{alg}' was not lent by the pool")]
    ForeignClone {
        /// Algorithm name
        alg: String,
    },
}

impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::UnknownType { .. } | PoolError::InitializeFailed { .. } => {
                CoreError::Configuration {
                    errors: vec![err.to_string()],
                }
            }
            PoolError::OutOfOrder { ref tag, .. } | PoolError::NotHeld { ref tag, .. } => {
                CoreError::ResourceDeadlock {
                    resource: tag.clone(),
                    reason: err.to_string(),
                }
            }
            PoolError::ForeignClone { .. } => CoreError::internal(err),
        }
    }
}

/// A clone on loan to a task
pub struct LentClone {
    alg: AlgIndex,
    instance: Box<dyn Algorithm>,
}

impl LentClone {
    /// Algorithm the clone belongs to
    #[must_use]
    pub fn alg(&self) -> AlgIndex {
        self.alg
    }

    /// The clone itself
    pub fn instance(&mut self) -> &mut dyn Algorithm {
        self.instance.as_mut()
    }
}

impl std::fmt::Debug for LentClone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LentClone").field("alg", &self.alg).finish()
    }
}

struct Entry {
    idle: Vec<Box<dyn Algorithm>>,
    created: u32,
    limit: u32,
    busy: u32,
    peak: u32,
    tags: Vec<usize>,
}

/// Algorithm resource pool
pub struct AlgorithmResourcePool {
    graph: Arc<PrecedenceGraph>,
    registry: AlgorithmRegistry,
    entries: Vec<Entry>,
    tags: IndexMap<String, Option<AlgIndex>>,
}

impl AlgorithmResourcePool {
    /// Create the pool and the first clone of every algorithm
    ///
    /// # Errors
    ///
    /// Fails on an unregistered type or a clone that does not initialize
    pub fn new(graph: Arc<PrecedenceGraph>, registry: AlgorithmRegistry) -> Result<Self, PoolError> {
        let mut tags: IndexMap<String, Option<AlgIndex>> = IndexMap::new();
        for desc in graph.algorithms() {
            for tag in &desc.resources {
                tags.entry(tag.clone()).or_insert(None);
            }
        }
        tags.sort_keys();

        let mut entries = Vec::with_capacity(graph.alg_count());
        for desc in graph.algorithms() {
            let mut own: Vec<usize> = desc
                .resources
                .iter()
                .filter_map(|t| tags.get_index_of(t))
                .collect();
            own.sort_unstable();
            own.dedup();
            entries.push(Entry {
                idle: Vec::new(),
                created: 0,
                limit: desc.effective_cardinality().max(1),
                busy: 0,
                peak: 0,
                tags: own,
            });
        }

        let mut pool = Self {
            graph,
            registry,
            entries,
            tags,
        };
        for alg in pool.graph.alg_indices().collect::<Vec<_>>() {
            let clone = pool.create(alg)?;
            pool.entries[alg.as_usize()].idle.push(clone);
        }
        tracing::debug!(algorithms = pool.entries.len(), tags = pool.tags.len(), "resource pool ready");
        Ok(pool)
    }

    fn create(&mut self, alg: AlgIndex) -> Result<Box<dyn Algorithm>, PoolError> {
        let desc = self.graph.algorithm(alg);
        let mut instance = self.registry.create(desc).map_err(|_| PoolError::UnknownType {
            alg: desc.name.clone(),
            type_name: desc.type_name.clone(),
        })?;
        let status = instance.initialize();
        if !status.is_success() {
            return Err(PoolError::InitializeFailed {
                alg: desc.name.clone(),
                status,
            });
        }
        let entry = &mut self.entries[alg.as_usize()];
        entry.created += 1;
        tracing::trace!(alg = %desc.name, clone = entry.created, "clone created");
        Ok(instance)
    }

    /// Try to borrow a clone together with the algorithm's exclusive tags
    ///
    /// Returns `Ok(None)` when every clone is busy or a tag is held.
    ///
    /// # Errors
    ///
    /// Fails if a lazily created clone cannot be built
    pub fn acquire(&mut self, alg: AlgIndex) -> CoreResult<Option<LentClone>> {
        let entry = &self.entries[alg.as_usize()];
        if entry.idle.is_empty() && entry.created >= entry.limit {
            return Ok(None);
        }
        let wanted = entry.tags.clone();
        if !self.lock_tags(alg, &wanted)? {
            return Ok(None);
        }
        let instance = match self.entries[alg.as_usize()].idle.pop() {
            Some(instance) => instance,
            None => match self.create(alg) {
                Ok(instance) => instance,
                Err(e) => {
                    self.unlock_tags(alg, &wanted)?;
                    return Err(e.into());
                }
            },
        };
        let entry = &mut self.entries[alg.as_usize()];
        entry.busy += 1;
        entry.peak = entry.peak.max(entry.busy);
        Ok(Some(LentClone { alg, instance }))
    }

    /// Return a clone and release its tags
    ///
    /// # Errors
    ///
    /// `ResourceDeadlock` if a tag was not held by the algorithm
    pub fn release(&mut self, clone: LentClone) -> CoreResult<()> {
        let alg = clone.alg;
        self.checkin(alg)?;
        self.entries[alg.as_usize()].idle.push(clone.instance);
        Ok(())
    }

    /// Drop a clone that may be in a broken state; a fresh one is built on demand
    ///
    /// # Errors
    ///
    /// `ResourceDeadlock` if a tag was not held by the algorithm
    pub fn discard(&mut self, clone: LentClone) -> CoreResult<()> {
        let alg = clone.alg;
        self.checkin(alg)?;
        let entry = &mut self.entries[alg.as_usize()];
        entry.created = entry.created.saturating_sub(1);
        tracing::warn!(alg = %self.graph.name(alg), "clone discarded");
        Ok(())
    }

    fn checkin(&mut self, alg: AlgIndex) -> CoreResult<()> {
        let entry = &mut self.entries[alg.as_usize()];
        if entry.busy == 0 {
            return Err(PoolError::ForeignClone {
                alg: self.graph.name(alg).to_string(),
            }
            .into());
        }
        entry.busy -= 1;
        let held = entry.tags.clone();
        self.unlock_tags(alg, &held)
    }

    /// Take every tag or none
    ///
    /// Tag indices must be strictly increasing; anything else is an
    /// ordering violation.
    fn lock_tags(&mut self, alg: AlgIndex, wanted: &[usize]) -> CoreResult<bool> {
        for pair in wanted.windows(2) {
            if pair[0] >= pair[1] {
                return Err(self.out_of_order(pair[1], pair[0]).into());
            }
        }
        if wanted
            .iter()
            .any(|&t| self.tags.get_index(t).is_some_and(|(_, holder)| holder.is_some()))
        {
            return Ok(false);
        }
        for &t in wanted {
            if let Some((_, holder)) = self.tags.get_index_mut(t) {
                *holder = Some(alg);
            }
        }
        Ok(true)
    }

    fn unlock_tags(&mut self, alg: AlgIndex, held: &[usize]) -> CoreResult<()> {
        for &t in held {
            match self.tags.get_index_mut(t) {
                Some((_, holder)) if *holder == Some(alg) => *holder = None,
                Some((tag, _)) => {
                    return Err(PoolError::NotHeld {
                        tag: tag.clone(),
                        alg: self.graph.name(alg).to_string(),
                    }
                    .into())
                }
                None => return Err(CoreError::internal(format!("unknown tag index {}", t))),
            }
        }
        Ok(())
    }

    fn out_of_order(&self, tag: usize, previous: usize) -> PoolError {
        let name = |i: usize| {
            self.tags
                .get_index(i)
                .map_or_else(|| i.to_string(), |(t, _)| t.clone())
        };
        PoolError::OutOfOrder {
            tag: name(tag),
            previous: name(previous),
        }
    }

    /// Lock tags by name, as an ad-hoc caller would
    ///
    /// # Errors
    ///
    /// `ResourceDeadlock` when the names are not in lexicographic order
    /// or are unknown to the pool
    pub fn lock_named(&mut self, alg: AlgIndex, tags: &[&str]) -> CoreResult<bool> {
        let mut wanted = Vec::with_capacity(tags.len());
        for tag in tags {
            let index = self.tags.get_index_of(*tag).ok_or_else(|| CoreError::ResourceDeadlock {
                resource: (*tag).to_string(),
                reason: "unknown resource tag".to_string(),
            })?;
            wanted.push(index);
        }
        self.lock_tags(alg, &wanted)
    }

    /// Release tags locked with [`AlgorithmResourcePool::lock_named`]
    ///
    /// # Errors
    ///
    /// `ResourceDeadlock` if a tag is not held by `alg`
    pub fn unlock_named(&mut self, alg: AlgIndex, tags: &[&str]) -> CoreResult<()> {
        let held: Vec<usize> = tags.iter().filter_map(|t| self.tags.get_index_of(*t)).collect();
        self.unlock_tags(alg, &held)
    }

    /// Holder of a tag
    #[must_use]
    pub fn holder(&self, tag: &str) -> Option<AlgIndex> {
        self.tags.get(tag).copied().flatten()
    }

    /// Clones currently lent out
    #[must_use]
    pub fn busy(&self, alg: AlgIndex) -> u32 {
        self.entries[alg.as_usize()].busy
    }

    /// Highest number of clones lent out at once
    #[must_use]
    pub fn peak(&self, alg: AlgIndex) -> u32 {
        self.entries[alg.as_usize()].peak
    }

    /// Clones created so far
    #[must_use]
    pub fn created(&self, alg: AlgIndex) -> u32 {
        self.entries[alg.as_usize()].created
    }

    /// Finalize every idle clone
    ///
    /// Clones still on loan (tasks abandoned after a timeout) are skipped.
    /// Returns the algorithms whose finalize did not succeed.
    pub fn finalize_all(&mut self) -> Vec<(String, StatusCode)> {
        let mut failed = Vec::new();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            let name = self.graph.name(AlgIndex::from_usize(i));
            if entry.busy > 0 {
                tracing::warn!(alg = %name, busy = entry.busy, "clones still on loan at shutdown");
            }
            for mut clone in entry.idle.drain(..) {
                let status = clone.finalize();
                if !status.is_success() {
                    failed.push((name.to_string(), status));
                }
            }
        }
        failed
    }
}

impl std::fmt::Debug for AlgorithmResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmResourcePool")
            .field("algorithms", &self.entries.len())
            .field("tags", &self.tags)
            .finish()
    }
}

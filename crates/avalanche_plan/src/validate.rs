//! Configuration validator.
//!
//! Assembles a [`PrecedenceGraph`] from descriptors and a control-flow tree
//! and checks it. Every problem found is reported; nothing stops at the
//! first error.

use avalanche_core::{AlgIndex, CoreError, NodeIndex};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::{tarjan_scc, toposort};

use crate::control::{empty_root, flatten, CfNodeKind, CfSpec};
use crate::descriptor::{AlgorithmDescriptor, Realm};
use crate::graph::{JointVertex, PrecedenceGraph, Producer};
use crate::path::DataPath;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two algorithms share a name
    DuplicateAlgorithm { name: String },
    /// Control flow references an undeclared algorithm
    UnknownAlgorithm { name: String },
    /// Two control-flow nodes share a name
    DuplicateNode { name: String },
    /// Structurally invalid control-flow node
    MalformedNode { name: String, reason: String },
    /// Structurally invalid descriptor
    MalformedAlgorithm { name: String, reason: String },
    /// Cardinality of zero
    ZeroCardinality { alg: String },
    /// Empty or repeated exclusive-resource tag
    InvalidResource { alg: String, tag: String, reason: String },
    /// More than one producer for a path
    DuplicateProducer { path: DataPath, first: String, second: String },
    /// A path both produced by an algorithm and provided by the source
    ProvidedAndProduced { path: DataPath, alg: String },
    /// An input nobody produces
    MissingProducer { path: DataPath, consumer: String },
    /// Event path in the conditions realm or vice versa
    RealmMismatch { alg: String, path: DataPath },
    /// Event algorithm absent from the control flow
    NotInControlFlow { alg: String },
    /// Conditions algorithm placed in the control flow
    ConditionsInControlFlow { alg: String },
    /// The configured data loader is not a declared algorithm
    UnknownDataLoader { name: String },
    /// A view maker names a node that does not exist
    UnknownViewNode { alg: String, node: String },
    /// Two makers for the same view node
    DuplicateViewMaker { node: String },
    /// A view maker outside the scope of its view node's parent
    MisplacedViewMaker { alg: String, node: String },
    /// Data produced inside a view read from outside it
    IsolationViolation { path: DataPath, producer: String, consumer: String },
    /// Cycle in the joint control-flow + data-flow graph
    Cycle { algorithms: Vec<String> },
    /// More algorithms than allowed
    TooManyAlgorithms { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateAlgorithm { name } => write!(f, "duplicate algorithm name '{}'", name),
            Self::UnknownAlgorithm { name } => {
                write!(f, "control flow references unknown algorithm '{}'", name)
            }
            Self::DuplicateNode { name } => write!(f, "duplicate control-flow node '{}'", name),
            Self::MalformedNode { name, reason } => {
                write!(f, "malformed control-flow node '{}': {}", name, reason)
            }
            Self::MalformedAlgorithm { name, reason } => {
                write!(f, "malformed algorithm '{}': {}", name, reason)
            }
            Self::ZeroCardinality { alg } => write!(f, "algorithm '{}' has cardinality 0", alg),
            Self::InvalidResource { alg, tag, reason } => {
                write!(f, "illegal exclusive-resource tag '{}' on '{}': {}", tag, alg, reason)
            }
            Self::DuplicateProducer { path, first, second } => {
                write!(f, "duplicate producer for {}: '{}' and '{}'", path, first, second)
            }
            Self::ProvidedAndProduced { path, alg } => {
                write!(f, "duplicate producer for {}: event source and '{}'", path, alg)
            }
            Self::MissingProducer { path, consumer } => {
                write!(f, "missing producer for {} read by '{}'", path, consumer)
            }
            Self::RealmMismatch { alg, path } => {
                write!(f, "algorithm '{}' accesses {} outside its realm", alg, path)
            }
            Self::NotInControlFlow { alg } => {
                write!(f, "algorithm '{}' is not part of the control flow", alg)
            }
            Self::ConditionsInControlFlow { alg } => {
                write!(f, "conditions algorithm '{}' must not appear in the control flow", alg)
            }
            Self::UnknownDataLoader { name } => write!(f, "unknown data loader '{}'", name),
            Self::UnknownViewNode { alg, node } => {
                write!(f, "view maker '{}' names unknown node '{}'", alg, node)
            }
            Self::DuplicateViewMaker { node } => {
                write!(f, "view node '{}' has more than one maker", node)
            }
            Self::MisplacedViewMaker { alg, node } => write!(
                f,
                "view maker '{}' must be a sibling-scope algorithm of view node '{}'",
                alg, node
            ),
            Self::IsolationViolation { path, producer, consumer } => write!(
                f,
                "isolation violation: {} produced by '{}' inside a view is read by '{}' outside it",
                path, producer, consumer
            ),
            Self::Cycle { algorithms } => write!(f, "cycle: {}", algorithms.join(" -> ")),
            Self::TooManyAlgorithms { count, max } => {
                write!(f, "algorithm count {} exceeds max {}", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        Self::Configuration {
            errors: vec![err.to_string()],
        }
    }
}

/// Fold a list of validation errors into one configuration error
#[must_use]
pub fn configuration_error(errors: &[ValidationError]) -> CoreError {
    CoreError::Configuration {
        errors: errors.iter().map(ToString::to_string).collect(),
    }
}

/// Builds and checks precedence graphs
#[derive(Debug, Clone, Default)]
pub struct Validator {
    /// Algorithm made producer of otherwise unproduced event inputs
    pub data_loader: Option<String>,
    /// Maximum allowed algorithms (0 = no limit)
    pub max_algorithms: usize,
}

impl Validator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data loader
    #[must_use]
    pub fn with_data_loader(mut self, name: Option<String>) -> Self {
        self.data_loader = name;
        self
    }

    /// Set maximum algorithm count
    #[must_use]
    pub fn with_max_algorithms(mut self, max: usize) -> Self {
        self.max_algorithms = max;
        self
    }

    /// Assemble and validate a precedence graph
    ///
    /// `provided` lists paths the event source pre-loads into every slot.
    ///
    /// # Errors
    ///
    /// Returns every configuration problem found
    pub fn build(
        &self,
        mut algorithms: Vec<AlgorithmDescriptor>,
        control_flow: Option<&CfSpec>,
        provided: &[DataPath],
    ) -> Result<PrecedenceGraph, Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.max_algorithms > 0 && algorithms.len() > self.max_algorithms {
            errors.push(ValidationError::TooManyAlgorithms {
                count: algorithms.len(),
                max: self.max_algorithms,
            });
        }

        let by_name = check_descriptors(&algorithms, &mut errors);

        let data_loader = self.data_loader.as_ref().and_then(|name| {
            let found = by_name.get(name).copied();
            if found.is_none() {
                errors.push(ValidationError::UnknownDataLoader { name: name.clone() });
            }
            found
        });

        let nodes = match control_flow {
            Some(spec) => flatten(spec, &|name| by_name.get(name).copied(), &mut errors),
            None => vec![empty_root()],
        };

        let mut leaf_of = vec![None; algorithms.len()];
        for node in &nodes {
            let Some(alg) = node.alg() else { continue };
            if algorithms[alg.as_usize()].realm == Realm::Conditions {
                errors.push(ValidationError::ConditionsInControlFlow {
                    alg: node.name.clone(),
                });
            } else if leaf_of[alg.as_usize()].is_none() {
                leaf_of[alg.as_usize()] = Some(node.index);
            }
        }
        let conditions: Vec<AlgIndex> = (0..algorithms.len())
            .map(AlgIndex::from_usize)
            .filter(|a| algorithms[a.as_usize()].realm == Realm::Conditions)
            .collect();
        for (i, desc) in algorithms.iter().enumerate() {
            if desc.realm == Realm::Event && leaf_of[i].is_none() {
                errors.push(ValidationError::NotInControlFlow {
                    alg: desc.name.clone(),
                });
            }
        }

        let mut producers: IndexMap<DataPath, Producer> = IndexMap::new();
        for path in provided {
            producers.insert(path.clone(), Producer::Source);
        }
        for (i, desc) in algorithms.iter().enumerate() {
            let alg = AlgIndex::from_usize(i);
            let mut register = |path: &DataPath, producer: Producer| match producers.get(path) {
                Some(Producer::Source) => errors.push(ValidationError::ProvidedAndProduced {
                    path: path.clone(),
                    alg: desc.name.clone(),
                }),
                Some(existing) => errors.push(ValidationError::DuplicateProducer {
                    path: path.clone(),
                    first: existing
                        .algorithm()
                        .map_or_else(String::new, |a| algorithms[a.as_usize()].name.clone()),
                    second: desc.name.clone(),
                }),
                None => {
                    producers.insert(path.clone(), producer);
                }
            };
            for out in &desc.outputs {
                register(out, Producer::Algorithm(alg));
            }
            if let Some(views) = &desc.views {
                register(&views.collection, Producer::Algorithm(alg));
                for out in &views.outputs {
                    register(out, Producer::ViewSeed(alg));
                }
            }
        }

        let mut consumers: IndexMap<DataPath, Vec<AlgIndex>> = IndexMap::new();
        for (i, desc) in algorithms.iter().enumerate() {
            for input in &desc.inputs {
                let entry = consumers.entry(input.clone()).or_default();
                if !entry.contains(&AlgIndex::from_usize(i)) {
                    entry.push(AlgIndex::from_usize(i));
                }
            }
        }

        let mut loaded = Vec::new();
        for (path, readers) in &consumers {
            if producers.contains_key(path) {
                continue;
            }
            match data_loader {
                Some(loader) if !path.is_conditions() => {
                    tracing::debug!(path = %path, loader = %algorithms[loader.as_usize()].name, "input assigned to data loader");
                    producers.insert(path.clone(), Producer::Algorithm(loader));
                    loaded.push(path.clone());
                }
                _ => {
                    for reader in readers {
                        errors.push(ValidationError::MissingProducer {
                            path: path.clone(),
                            consumer: algorithms[reader.as_usize()].name.clone(),
                        });
                    }
                }
            }
        }
        if let Some(loader) = data_loader {
            algorithms[loader.as_usize()].outputs.extend(loaded);
        }

        let mut view_makers: IndexMap<NodeIndex, AlgIndex> = IndexMap::new();
        for (i, desc) in algorithms.iter().enumerate() {
            let Some(views) = &desc.views else { continue };
            match nodes.iter().find(|n| n.name == views.node) {
                None => errors.push(ValidationError::UnknownViewNode {
                    alg: desc.name.clone(),
                    node: views.node.clone(),
                }),
                Some(node) if node.parent.is_none() => errors.push(ValidationError::MalformedNode {
                    name: node.name.clone(),
                    reason: "the root cannot be a view node".to_string(),
                }),
                Some(node) if !matches!(node.kind, CfNodeKind::Decision(_)) => {
                    errors.push(ValidationError::MalformedNode {
                        name: node.name.clone(),
                        reason: "a view node must be a decision node".to_string(),
                    });
                }
                Some(node) => {
                    if view_makers.insert(node.index, AlgIndex::from_usize(i)).is_some() {
                        errors.push(ValidationError::DuplicateViewMaker {
                            node: node.name.clone(),
                        });
                    }
                }
            }
        }

        // Parents precede children in the arena, so one forward pass suffices
        let mut scope_of = vec![NodeIndex::new(0); nodes.len()];
        for node in &nodes {
            if let Some(parent) = node.parent {
                scope_of[node.index.as_usize()] = if view_makers.contains_key(&parent) {
                    parent
                } else {
                    scope_of[parent.as_usize()]
                };
            }
        }
        let mut scope_algs: IndexMap<NodeIndex, Vec<AlgIndex>> = IndexMap::new();
        scope_algs.insert(NodeIndex::new(0), Vec::new());
        let mut scope_views: IndexMap<NodeIndex, Vec<NodeIndex>> = IndexMap::new();
        for node in &nodes {
            if view_makers.contains_key(&node.index) {
                scope_algs.entry(node.index).or_default();
                scope_views
                    .entry(scope_of[node.index.as_usize()])
                    .or_default()
                    .push(node.index);
            }
        }
        for node in &nodes {
            if let Some(alg) = node.alg() {
                if leaf_of[alg.as_usize()] == Some(node.index) {
                    scope_algs
                        .entry(scope_of[node.index.as_usize()])
                        .or_default()
                        .push(alg);
                }
            }
        }

        for (node, maker) in &view_makers {
            let Some(leaf) = leaf_of[maker.as_usize()] else { continue };
            if scope_of[leaf.as_usize()] != scope_of[node.as_usize()] {
                errors.push(ValidationError::MisplacedViewMaker {
                    alg: algorithms[maker.as_usize()].name.clone(),
                    node: nodes[node.as_usize()].name.clone(),
                });
            }
        }

        // A reader sees a path when the writing scope encloses its own scope
        let encloses = |outer: NodeIndex, mut inner: NodeIndex| loop {
            if inner == outer {
                return true;
            }
            if inner.as_usize() == 0 {
                return false;
            }
            inner = scope_of[inner.as_usize()];
        };
        for (path, readers) in &consumers {
            if path.is_conditions() {
                continue;
            }
            let (written_in, producer) = match producers.get(path) {
                Some(Producer::Algorithm(a)) => match leaf_of[a.as_usize()] {
                    Some(leaf) => (scope_of[leaf.as_usize()], *a),
                    None => continue,
                },
                Some(Producer::ViewSeed(a)) => {
                    match view_makers.iter().find(|(_, m)| **m == *a) {
                        Some((node, _)) => (*node, *a),
                        None => continue,
                    }
                }
                _ => continue,
            };
            for reader in readers {
                let Some(leaf) = leaf_of[reader.as_usize()] else { continue };
                if !encloses(written_in, scope_of[leaf.as_usize()]) {
                    errors.push(ValidationError::IsolationViolation {
                        path: path.clone(),
                        producer: algorithms[producer.as_usize()].name.clone(),
                        consumer: algorithms[reader.as_usize()].name.clone(),
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let upstream = algorithms
            .iter()
            .map(|desc| {
                let mut ups: IndexSet<AlgIndex> = IndexSet::new();
                for input in &desc.inputs {
                    if let Some(a) = producers.get(input).and_then(Producer::algorithm) {
                        ups.insert(a);
                    }
                }
                ups.into_iter().collect()
            })
            .collect();

        let mut graph = PrecedenceGraph {
            algorithms,
            by_name,
            nodes,
            leaf_of,
            producers,
            consumers,
            upstream,
            order: Vec::new(),
            priority: Vec::new(),
            view_makers,
            scope_of,
            scope_algs,
            scope_views,
            conditions,
            data_loader,
        };

        check_cycles(&mut graph)?;
        graph.compute_priorities();
        Ok(graph)
    }
}

fn check_descriptors(
    algorithms: &[AlgorithmDescriptor],
    errors: &mut Vec<ValidationError>,
) -> IndexMap<String, AlgIndex> {
    let mut by_name = IndexMap::new();
    for (i, desc) in algorithms.iter().enumerate() {
        if desc.name.trim().is_empty() {
            errors.push(ValidationError::MalformedAlgorithm {
                name: desc.name.clone(),
                reason: "empty name".to_string(),
            });
        }
        if by_name.insert(desc.name.clone(), AlgIndex::from_usize(i)).is_some() {
            errors.push(ValidationError::DuplicateAlgorithm {
                name: desc.name.clone(),
            });
        }
        if desc.effective_cardinality() == 0 {
            errors.push(ValidationError::ZeroCardinality {
                alg: desc.name.clone(),
            });
        }

        let mut tags = IndexSet::new();
        for tag in &desc.resources {
            let reason = if tag.trim().is_empty() {
                Some("empty tag")
            } else if !tags.insert(tag.as_str()) {
                Some("tag listed twice; acquisition order would self-deadlock")
            } else {
                None
            };
            if let Some(reason) = reason {
                errors.push(ValidationError::InvalidResource {
                    alg: desc.name.clone(),
                    tag: tag.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        let conditions = desc.realm == Realm::Conditions;
        for path in desc.produced_paths() {
            if path.is_conditions() != conditions {
                errors.push(ValidationError::RealmMismatch {
                    alg: desc.name.clone(),
                    path: path.clone(),
                });
            }
        }
        if conditions {
            for path in desc.inputs.iter().filter(|p| !p.is_conditions()) {
                errors.push(ValidationError::RealmMismatch {
                    alg: desc.name.clone(),
                    path: path.clone(),
                });
            }
            if desc.views.is_some() {
                errors.push(ValidationError::MalformedAlgorithm {
                    name: desc.name.clone(),
                    reason: "conditions algorithms cannot make views".to_string(),
                });
            }
        }
    }
    by_name
}

fn check_cycles(graph: &mut PrecedenceGraph) -> Result<(), Vec<ValidationError>> {
    let joint = graph.joint_graph();
    let mut errors = Vec::new();
    for scc in tarjan_scc(&joint) {
        let looped = scc.len() > 1 || joint.find_edge(scc[0], scc[0]).is_some();
        if !looped {
            continue;
        }
        let mut members: Vec<AlgIndex> = scc
            .iter()
            .filter_map(|v| match joint[*v] {
                JointVertex::Alg(a) => Some(a),
                _ => None,
            })
            .collect();
        members.sort();
        let mut algorithms: Vec<String> = members.iter().map(|a| graph.name(*a).to_string()).collect();
        if let Some(first) = algorithms.first().cloned() {
            algorithms.push(first);
        }
        errors.push(ValidationError::Cycle { algorithms });
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let order = toposort(&joint, None).map_err(|c| {
        vec![ValidationError::Cycle {
            algorithms: vec![format!("{:?}", joint[c.node_id()])],
        }]
    })?;
    graph.order = order
        .into_iter()
        .filter_map(|v| match joint[v] {
            JointVertex::Alg(a) => Some(a),
            _ => None,
        })
        .collect();
    Ok(())
}

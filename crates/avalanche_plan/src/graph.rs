//! The immutable precedence graph.
//!
//! Holds the algorithms, the flattened control-flow arena and the data-flow
//! relations, and answers the readiness queries the scheduler issues on
//! every wake-up. Built and checked by [`Validator`](crate::Validator).

use avalanche_core::{AlgIndex, NodeIndex};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex as GraphIx};
use serde::Serialize;

use crate::control::{CfNode, CfNodeKind, CfSpec};
use crate::descriptor::{AlgorithmDescriptor, Realm, ViewSpec};
use crate::path::DataPath;
use crate::validate::{ValidationError, Validator};

/// Who makes a path available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Producer {
    /// Written by an algorithm as a regular output
    Algorithm(AlgIndex),
    /// Seeded into every view by a view maker
    ViewSeed(AlgIndex),
    /// Pre-populated by the event source
    Source,
}

impl Producer {
    /// Producing algorithm, if any
    #[must_use]
    pub const fn algorithm(&self) -> Option<AlgIndex> {
        match self {
            Self::Algorithm(a) | Self::ViewSeed(a) => Some(*a),
            Self::Source => None,
        }
    }
}

/// Static scheduling priority; smaller keys are dispatched first
///
/// Conditions producers come first, then algorithms on ordered nodes in
/// control-flow declaration order, then the rest by leaf depth. The
/// declaration index breaks remaining ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PriorityKey {
    class: u8,
    depth: u32,
    position: u32,
    alg: u32,
}

/// Vertex of the joint control-flow + data-flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointVertex {
    /// An algorithm
    Alg(AlgIndex),
    /// Entry of an interior control-flow node
    Begin(NodeIndex),
    /// Exit of an interior control-flow node
    End(NodeIndex),
}

/// Edge of the joint graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JointEdge {
    /// Control-flow containment
    Contains,
    /// Ordered siblings
    Before,
    /// Data dependency through a path
    Data(DataPath),
    /// View maker feeding its view node
    Views,
}

/// Immutable static model of the job
#[derive(Debug, Clone)]
pub struct PrecedenceGraph {
    pub(crate) algorithms: Vec<AlgorithmDescriptor>,
    pub(crate) by_name: IndexMap<String, AlgIndex>,
    pub(crate) nodes: Vec<CfNode>,
    pub(crate) leaf_of: Vec<Option<NodeIndex>>,
    pub(crate) producers: IndexMap<DataPath, Producer>,
    pub(crate) consumers: IndexMap<DataPath, Vec<AlgIndex>>,
    pub(crate) upstream: Vec<Vec<AlgIndex>>,
    pub(crate) order: Vec<AlgIndex>,
    pub(crate) priority: Vec<PriorityKey>,
    pub(crate) view_makers: IndexMap<NodeIndex, AlgIndex>,
    pub(crate) scope_of: Vec<NodeIndex>,
    pub(crate) scope_algs: IndexMap<NodeIndex, Vec<AlgIndex>>,
    pub(crate) scope_views: IndexMap<NodeIndex, Vec<NodeIndex>>,
    pub(crate) conditions: Vec<AlgIndex>,
    pub(crate) data_loader: Option<AlgIndex>,
}

impl PrecedenceGraph {
    /// Build and validate with default checks
    ///
    /// # Errors
    ///
    /// Returns every configuration problem found
    pub fn build(
        algorithms: Vec<AlgorithmDescriptor>,
        control_flow: Option<&CfSpec>,
        provided: &[DataPath],
    ) -> Result<Self, Vec<ValidationError>> {
        Validator::new().build(algorithms, control_flow, provided)
    }

    /// Number of algorithms
    #[must_use]
    pub fn alg_count(&self) -> usize {
        self.algorithms.len()
    }

    /// Number of control-flow nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All algorithm descriptors in declaration order
    #[must_use]
    pub fn algorithms(&self) -> &[AlgorithmDescriptor] {
        &self.algorithms
    }

    /// Descriptor of an algorithm
    #[must_use]
    pub fn algorithm(&self, alg: AlgIndex) -> &AlgorithmDescriptor {
        &self.algorithms[alg.as_usize()]
    }

    /// Name of an algorithm
    #[must_use]
    pub fn name(&self, alg: AlgIndex) -> &str {
        &self.algorithms[alg.as_usize()].name
    }

    /// Look up an algorithm by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<AlgIndex> {
        self.by_name.get(name).copied()
    }

    /// Iterate over all algorithm indices
    pub fn alg_indices(&self) -> impl Iterator<Item = AlgIndex> + '_ {
        (0..self.algorithms.len()).map(AlgIndex::from_usize)
    }

    /// Control-flow root
    #[must_use]
    pub fn root(&self) -> NodeIndex {
        NodeIndex::new(0)
    }

    /// Control-flow node
    #[must_use]
    pub fn node(&self, node: NodeIndex) -> &CfNode {
        &self.nodes[node.as_usize()]
    }

    /// All control-flow nodes in pre-order
    #[must_use]
    pub fn nodes(&self) -> &[CfNode] {
        &self.nodes
    }

    /// Find a control-flow node by name
    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.index)
    }

    /// Leaf node of an event algorithm; `None` for conditions producers
    #[must_use]
    pub fn cf_node_of(&self, alg: AlgIndex) -> Option<NodeIndex> {
        self.leaf_of[alg.as_usize()]
    }

    /// Strict ancestors of a node, nearest first
    pub fn ancestors(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(self.nodes[node.as_usize()].parent, move |n| {
            self.nodes[n.as_usize()].parent
        })
    }

    /// Producer of a path
    #[must_use]
    pub fn data_producer(&self, path: &DataPath) -> Option<Producer> {
        self.producers.get(path).copied()
    }

    /// Algorithms reading a path
    #[must_use]
    pub fn data_consumers(&self, path: &DataPath) -> &[AlgIndex] {
        self.consumers.get(path).map_or(&[], Vec::as_slice)
    }

    /// Algorithms whose outputs `alg` consumes
    #[must_use]
    pub fn upstream(&self, alg: AlgIndex) -> &[AlgIndex] {
        &self.upstream[alg.as_usize()]
    }

    /// Algorithms in a topological order of the joint graph
    #[must_use]
    pub fn topological_order(&self) -> &[AlgIndex] {
        &self.order
    }

    /// Scheduling priority of an algorithm
    #[must_use]
    pub fn priority(&self, alg: AlgIndex) -> PriorityKey {
        self.priority[alg.as_usize()]
    }

    /// Conditions producers
    #[must_use]
    pub fn conditions_algorithms(&self) -> &[AlgIndex] {
        &self.conditions
    }

    /// Whether an algorithm runs in the conditions realm
    #[must_use]
    pub fn is_conditions(&self, alg: AlgIndex) -> bool {
        self.algorithms[alg.as_usize()].realm == Realm::Conditions
    }

    /// Algorithm made responsible for unproduced inputs
    #[must_use]
    pub fn data_loader(&self) -> Option<AlgIndex> {
        self.data_loader
    }

    /// Maker of a view node
    #[must_use]
    pub fn view_maker(&self, node: NodeIndex) -> Option<AlgIndex> {
        self.view_makers.get(&node).copied()
    }

    /// View node fed by a maker, with its view block
    #[must_use]
    pub fn views_of(&self, alg: AlgIndex) -> Option<(NodeIndex, &ViewSpec)> {
        let spec = self.algorithms[alg.as_usize()].views.as_ref()?;
        let node = self
            .view_makers
            .iter()
            .find(|(_, maker)| **maker == alg)
            .map(|(node, _)| *node)?;
        Some((node, spec))
    }

    /// Whether a node is a view node
    #[must_use]
    pub fn is_view_node(&self, node: NodeIndex) -> bool {
        self.view_makers.contains_key(&node)
    }

    /// View scope a node belongs to: its nearest strict view-node ancestor, or the root
    #[must_use]
    pub fn scope_of(&self, node: NodeIndex) -> NodeIndex {
        self.scope_of[node.as_usize()]
    }

    /// Event algorithms owned by the traversal rooted at `scope`
    #[must_use]
    pub fn scope_algorithms(&self, scope: NodeIndex) -> &[AlgIndex] {
        self.scope_algs.get(&scope).map_or(&[], Vec::as_slice)
    }

    /// View nodes decided by the traversal rooted at `scope`
    #[must_use]
    pub fn scope_view_nodes(&self, scope: NodeIndex) -> &[NodeIndex] {
        self.scope_views.get(&scope).map_or(&[], Vec::as_slice)
    }

    /// Leaves and nested view nodes below `node` that the traversal owning
    /// `node` is responsible for
    ///
    /// The walk stops at nested view nodes, which are returned instead of
    /// their contents.
    #[must_use]
    pub fn owned_descendants(&self, node: NodeIndex) -> (Vec<AlgIndex>, Vec<NodeIndex>) {
        let mut algs = Vec::new();
        let mut views = Vec::new();
        let mut stack: Vec<NodeIndex> = self.nodes[node.as_usize()].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            let cf = &self.nodes[n.as_usize()];
            if self.is_view_node(n) {
                views.push(n);
                continue;
            }
            match cf.kind {
                CfNodeKind::Leaf(alg) => algs.push(alg),
                _ => stack.extend(cf.children.iter().rev().copied()),
            }
        }
        (algs, views)
    }

    /// Joint control-flow + data-flow graph
    ///
    /// Interior nodes contribute begin/end vertices; ordered siblings are
    /// chained end-to-begin; every data dependency adds a producer-to-consumer
    /// edge; view makers feed the begin vertex of their node.
    #[must_use]
    pub fn joint_graph(&self) -> DiGraph<JointVertex, JointEdge> {
        let mut g = DiGraph::new();
        let alg_ix: Vec<GraphIx> = self
            .alg_indices()
            .map(|a| g.add_node(JointVertex::Alg(a)))
            .collect();

        let mut spans: Vec<(GraphIx, GraphIx)> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let span = match node.kind {
                CfNodeKind::Leaf(alg) => (alg_ix[alg.as_usize()], alg_ix[alg.as_usize()]),
                _ => (
                    g.add_node(JointVertex::Begin(node.index)),
                    g.add_node(JointVertex::End(node.index)),
                ),
            };
            spans.push(span);
        }

        for node in &self.nodes {
            let (begin, end) = spans[node.index.as_usize()];
            if node.children.is_empty() && node.alg().is_none() {
                g.add_edge(begin, end, JointEdge::Contains);
            }
            for child in &node.children {
                let (cb, ce) = spans[child.as_usize()];
                g.add_edge(begin, cb, JointEdge::Contains);
                g.add_edge(ce, end, JointEdge::Contains);
            }
            if node.flags().is_some_and(|f| f.ordered) {
                for pair in node.children.windows(2) {
                    let (_, prev_end) = spans[pair[0].as_usize()];
                    let (next_begin, _) = spans[pair[1].as_usize()];
                    g.add_edge(prev_end, next_begin, JointEdge::Before);
                }
            }
        }

        for (path, consumers) in &self.consumers {
            let Some(producer) = self.producers.get(path).and_then(Producer::algorithm) else {
                continue;
            };
            for consumer in consumers {
                g.add_edge(
                    alg_ix[producer.as_usize()],
                    alg_ix[consumer.as_usize()],
                    JointEdge::Data(path.clone()),
                );
            }
        }

        for (node, maker) in &self.view_makers {
            let (begin, _) = spans[node.as_usize()];
            g.add_edge(alg_ix[maker.as_usize()], begin, JointEdge::Views);
        }

        g
    }

    pub(crate) fn compute_priorities(&mut self) {
        self.priority = self
            .alg_indices()
            .map(|alg| match self.leaf_of[alg.as_usize()] {
                None => PriorityKey {
                    class: 0,
                    depth: 0,
                    position: 0,
                    alg: alg.as_u32(),
                },
                Some(leaf) => {
                    let node = &self.nodes[leaf.as_usize()];
                    let ordered = node
                        .parent
                        .and_then(|p| self.nodes[p.as_usize()].flags())
                        .is_some_and(|f| f.ordered);
                    PriorityKey {
                        class: if ordered { 1 } else { 2 },
                        depth: if ordered { 0 } else { node.depth },
                        position: leaf.as_u32(),
                        alg: alg.as_u32(),
                    }
                }
            })
            .collect();
    }
}

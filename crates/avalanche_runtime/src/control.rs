//! Control-flow evaluation for one traversal.
//!
//! A traversal owns the subtree below its scope root (the graph root for
//! the main traversal of a slot, a view node for a view). Decisions start
//! undefined, are set on leaves as algorithms finish and propagate upward.
//! A decided node never changes again.

use avalanche_core::{Decision, NodeIndex};
use avalanche_plan::{CfNodeKind, NodeFlags, PrecedenceGraph};

/// Decisions of every node owned by one traversal
#[derive(Debug, Clone)]
pub struct ControlFlowState {
    root: NodeIndex,
    decisions: Vec<Decision>,
}

impl ControlFlowState {
    /// Fresh state for the traversal rooted at `root`, already reset
    #[must_use]
    pub fn new(graph: &PrecedenceGraph, root: NodeIndex) -> Self {
        let mut state = Self {
            root,
            decisions: vec![Decision::Undefined; graph.node_count()],
        };
        state.reset(graph);
        state
    }

    /// Scope root
    #[must_use]
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Clear every decision and decide empty nodes with their identity
    ///
    /// Returns the nodes decided by the reset, deepest first.
    pub fn reset(&mut self, graph: &PrecedenceGraph) -> Vec<NodeIndex> {
        self.decisions.iter_mut().for_each(|d| *d = Decision::Undefined);
        let empties: Vec<NodeIndex> = self
            .owned_nodes(graph)
            .into_iter()
            .filter(|n| graph.node(*n).is_empty_decision() && (*n == self.root || !graph.is_view_node(*n)))
            .collect();
        let mut decided = Vec::new();
        for node in empties.into_iter().rev() {
            if self.is_decided(node) {
                continue;
            }
            let flags = graph.node(node).flags().unwrap_or_default();
            decided.extend(self.set_decision(graph, node, Decision::from_bool(identity(flags))));
        }
        decided
    }

    /// Nodes owned by this traversal in arena order; nested view nodes are
    /// included but not their contents
    fn owned_nodes(&self, graph: &PrecedenceGraph) -> Vec<NodeIndex> {
        let mut out = vec![self.root];
        let mut stack = vec![self.root];
        while let Some(n) = stack.pop() {
            for &child in &graph.node(n).children {
                out.push(child);
                if !graph.is_view_node(child) {
                    stack.push(child);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Decision of a node
    #[must_use]
    pub fn decision(&self, node: NodeIndex) -> Decision {
        self.decisions[node.as_usize()]
    }

    /// Whether a node is decided
    #[must_use]
    pub fn is_decided(&self, node: NodeIndex) -> bool {
        self.decision(node).is_decided()
    }

    /// Decision of the scope root
    #[must_use]
    pub fn root_decision(&self) -> Decision {
        self.decision(self.root)
    }

    /// Set a decision and propagate it upward
    ///
    /// Returns every node that became decided, starting with `node`.
    /// Propagation stops at the first node that stays undefined, at an
    /// already decided node, or at the scope root. Setting an already
    /// decided node is a no-op.
    pub fn set_decision(&mut self, graph: &PrecedenceGraph, node: NodeIndex, decision: Decision) -> Vec<NodeIndex> {
        if self.is_decided(node) || !decision.is_decided() {
            return Vec::new();
        }
        self.decisions[node.as_usize()] = decision;
        let mut decided = vec![node];
        let mut current = node;
        while current != self.root {
            let Some(parent) = graph.node(current).parent else {
                break;
            };
            if self.is_decided(parent) {
                break;
            }
            let value = self.evaluate(graph, parent);
            if !value.is_decided() {
                break;
            }
            self.decisions[parent.as_usize()] = value;
            decided.push(parent);
            current = parent;
        }
        decided
    }

    /// Mark a leaf as skipped without propagating
    ///
    /// Used for leaves below a node that is already decided.
    pub fn skip_leaf(&mut self, leaf: NodeIndex) {
        if !self.is_decided(leaf) {
            self.decisions[leaf.as_usize()] = Decision::False;
        }
    }

    /// Decision implied by the children of an interior node
    fn evaluate(&self, graph: &PrecedenceGraph, node: NodeIndex) -> Decision {
        let cf = graph.node(node);
        match cf.kind {
            CfNodeKind::Leaf(_) => self.decision(node),
            CfNodeKind::Not => cf
                .children
                .first()
                .map_or(Decision::Undefined, |c| self.decision(*c).invert()),
            CfNodeKind::Decision(flags) => {
                let decisive = flags.mode_or;
                if flags.short_circuit {
                    let fixed = cf.children.iter().any(|c| {
                        !graph.node(*c).leafless && self.decision(*c).as_bool() == Some(decisive)
                    });
                    if fixed {
                        return Decision::from_bool(flags.all_pass || decisive);
                    }
                }
                let mut values = Vec::with_capacity(cf.children.len());
                for child in &cf.children {
                    match self.decision(*child).as_bool() {
                        Some(v) => values.push(v),
                        None => return Decision::Undefined,
                    }
                }
                let value = if flags.mode_or {
                    values.iter().any(|v| *v)
                } else {
                    values.iter().all(|v| *v)
                };
                Decision::from_bool(flags.all_pass || value)
            }
        }
    }

    /// Whether no ancestor up to and including the scope root is decided
    #[must_use]
    pub fn is_active(&self, graph: &PrecedenceGraph, node: NodeIndex) -> bool {
        if node == self.root {
            return !self.is_decided(node);
        }
        for ancestor in graph.ancestors(node) {
            if self.is_decided(ancestor) {
                return false;
            }
            if ancestor == self.root {
                break;
            }
        }
        true
    }

    /// Whether control flow allows the node to start
    ///
    /// The node must be active and, below every ordered ancestor, every
    /// earlier sibling on the path must already be decided.
    #[must_use]
    pub fn is_eligible(&self, graph: &PrecedenceGraph, node: NodeIndex) -> bool {
        if !self.is_active(graph, node) {
            return false;
        }
        let mut child = node;
        while child != self.root {
            let Some(parent) = graph.node(child).parent else {
                break;
            };
            let cf = graph.node(parent);
            if cf.flags().is_some_and(|f: NodeFlags| f.ordered) {
                let earlier_open = cf
                    .children
                    .iter()
                    .take_while(|c| **c != child)
                    .any(|c| !self.is_decided(*c));
                if earlier_open {
                    return false;
                }
            }
            child = parent;
        }
        true
    }

    /// Whether every node is still undefined, for slot reuse checks
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.decisions.iter().all(|d| !d.is_decided())
    }
}

/// Decision of an interior node with no children
fn identity(flags: NodeFlags) -> bool {
    flags.all_pass || !flags.mode_or
}

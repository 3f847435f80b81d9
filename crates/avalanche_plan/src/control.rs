//! Control-flow trees.
//!
//! [`CfSpec`] is the nested form read from the job configuration. It is
//! flattened into an arena of [`CfNode`]s addressed by [`NodeIndex`], which
//! is what the evaluator walks at run time.

use avalanche_core::{AlgIndex, NodeIndex};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Combinator kind of an interior node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfKind {
    /// All children must pass; stops at the first failure
    And,
    /// Any child must pass; stops at the first success
    Or,
    /// Children run strictly in order; AND semantics with short-circuit
    Seq,
    /// Children run concurrently; AND semantics, no short-circuit
    Par,
    /// Inverts its single child
    Not,
    /// Flags given explicitly
    Custom,
}

impl CfKind {
    /// Default `(mode_or, short_circuit, ordered)` for the kind
    #[must_use]
    pub const fn default_flags(&self) -> (bool, bool, bool) {
        match self {
            Self::And => (false, true, false),
            Self::Or => (true, true, false),
            Self::Seq => (false, true, true),
            Self::Par | Self::Not | Self::Custom => (false, false, false),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Seq => "seq",
            Self::Par => "par",
            Self::Not => "not",
            Self::Custom => "node",
        }
    }
}

/// Interior node as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Combinator kind
    pub kind: CfKind,
    /// Optional node name; required for view nodes
    #[serde(default)]
    pub name: Option<String>,
    /// Children in declaration order
    #[serde(default)]
    pub children: Vec<CfSpec>,
    /// Stop evaluating siblings once the decision is fixed
    #[serde(default)]
    pub short_circuit: Option<bool>,
    /// Combine children by OR instead of AND
    #[serde(default)]
    pub mode_or: Option<bool>,
    /// Execute children strictly in order
    #[serde(default)]
    pub ordered: Option<bool>,
    /// Force a positive decision once all children are decided
    #[serde(default)]
    pub all_pass: bool,
}

/// A control-flow tree as written in the configuration
///
/// Leaves are bare algorithm names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CfSpec {
    /// Algorithm leaf
    Alg(String),
    /// Interior node
    Node(NodeSpec),
}

impl CfSpec {
    fn node(kind: CfKind, children: Vec<CfSpec>) -> Self {
        Self::Node(NodeSpec {
            kind,
            name: None,
            children,
            short_circuit: None,
            mode_or: None,
            ordered: None,
            all_pass: false,
        })
    }

    /// Algorithm leaf
    #[must_use]
    pub fn alg(name: impl Into<String>) -> Self {
        Self::Alg(name.into())
    }

    /// AND node
    #[must_use]
    pub fn and(children: Vec<CfSpec>) -> Self {
        Self::node(CfKind::And, children)
    }

    /// OR node
    #[must_use]
    pub fn or(children: Vec<CfSpec>) -> Self {
        Self::node(CfKind::Or, children)
    }

    /// Sequential node
    #[must_use]
    pub fn seq(children: Vec<CfSpec>) -> Self {
        Self::node(CfKind::Seq, children)
    }

    /// Parallel node
    #[must_use]
    pub fn par(children: Vec<CfSpec>) -> Self {
        Self::node(CfKind::Par, children)
    }

    /// Inverting node
    #[must_use]
    pub fn not(child: CfSpec) -> Self {
        Self::node(CfKind::Not, vec![child])
    }

    /// Name the node; no effect on leaves
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Self::Node(spec) = &mut self {
            spec.name = Some(name.into());
        }
        self
    }

    /// Override the short-circuit flag; no effect on leaves
    #[must_use]
    pub fn short_circuit(mut self, value: bool) -> Self {
        if let Self::Node(spec) = &mut self {
            spec.short_circuit = Some(value);
        }
        self
    }

    /// Override the OR-combination flag; no effect on leaves
    #[must_use]
    pub fn mode_or(mut self, value: bool) -> Self {
        if let Self::Node(spec) = &mut self {
            spec.mode_or = Some(value);
        }
        self
    }

    /// Set the all-pass flag; no effect on leaves
    #[must_use]
    pub fn all_pass(mut self) -> Self {
        if let Self::Node(spec) = &mut self {
            spec.all_pass = true;
        }
        self
    }

    /// Algorithm names referenced by the tree, in declaration order
    #[must_use]
    pub fn algorithms(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_algorithms(&mut out);
        out
    }

    fn collect_algorithms<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Alg(name) => out.push(name),
            Self::Node(spec) => {
                for child in &spec.children {
                    child.collect_algorithms(out);
                }
            }
        }
    }
}

/// Evaluation flags of an interior node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Combine children by OR
    pub mode_or: bool,
    /// Decide as soon as the outcome is fixed
    pub short_circuit: bool,
    /// Children become eligible one after the other
    pub ordered: bool,
    /// Decision forced TRUE
    pub all_pass: bool,
}

/// Role of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfNodeKind {
    /// Algorithm leaf
    Leaf(AlgIndex),
    /// Combinator over children
    Decision(NodeFlags),
    /// Inverter of its single child
    Not,
}

/// Flattened control-flow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfNode {
    /// Arena index
    pub index: NodeIndex,
    /// Node name; leaves carry the algorithm name
    pub name: String,
    /// Role
    pub kind: CfNodeKind,
    /// Parent node; `None` for the root
    pub parent: Option<NodeIndex>,
    /// Children in declaration order
    pub children: Vec<NodeIndex>,
    /// Distance from the root
    pub depth: u32,
    /// Whether no algorithm lives below this node
    pub leafless: bool,
}

impl CfNode {
    /// Algorithm of a leaf
    #[must_use]
    pub fn alg(&self) -> Option<AlgIndex> {
        match self.kind {
            CfNodeKind::Leaf(alg) => Some(alg),
            _ => None,
        }
    }

    /// Flags of a decision node
    #[must_use]
    pub fn flags(&self) -> Option<NodeFlags> {
        match self.kind {
            CfNodeKind::Decision(flags) => Some(flags),
            _ => None,
        }
    }

    /// Whether the node is an interior decision node without children
    #[must_use]
    pub fn is_empty_decision(&self) -> bool {
        matches!(self.kind, CfNodeKind::Decision(_)) && self.children.is_empty()
    }
}

/// Flatten a tree into an arena
///
/// `resolve` maps algorithm names to indices; unknown names are reported
/// and the leaf is dropped. The returned arena always has a root at index 0.
pub(crate) fn flatten(
    spec: &CfSpec,
    resolve: &dyn Fn(&str) -> Option<AlgIndex>,
    errors: &mut Vec<ValidationError>,
) -> Vec<CfNode> {
    let mut nodes = Vec::new();
    let mut names: IndexMap<String, NodeIndex> = IndexMap::new();
    flatten_into(spec, None, 0, resolve, &mut nodes, &mut names, errors);
    if nodes.is_empty() {
        nodes.push(empty_root());
    }
    mark_leafless(&mut nodes);
    nodes
}

/// Root used when a job declares no control flow: an empty OR
#[must_use]
pub fn empty_root() -> CfNode {
    CfNode {
        index: NodeIndex::new(0),
        name: "root".to_string(),
        kind: CfNodeKind::Decision(NodeFlags {
            mode_or: true,
            short_circuit: true,
            ordered: false,
            all_pass: false,
        }),
        parent: None,
        children: Vec::new(),
        depth: 0,
        leafless: true,
    }
}

fn flatten_into(
    spec: &CfSpec,
    parent: Option<NodeIndex>,
    depth: u32,
    resolve: &dyn Fn(&str) -> Option<AlgIndex>,
    nodes: &mut Vec<CfNode>,
    names: &mut IndexMap<String, NodeIndex>,
    errors: &mut Vec<ValidationError>,
) -> Option<NodeIndex> {
    let index = NodeIndex::from_usize(nodes.len());
    match spec {
        CfSpec::Alg(name) => {
            let Some(alg) = resolve(name) else {
                errors.push(ValidationError::UnknownAlgorithm { name: name.clone() });
                return None;
            };
            if names.insert(name.clone(), index).is_some() {
                errors.push(ValidationError::DuplicateNode { name: name.clone() });
            }
            nodes.push(CfNode {
                index,
                name: name.clone(),
                kind: CfNodeKind::Leaf(alg),
                parent,
                children: Vec::new(),
                depth,
                leafless: false,
            });
        }
        CfSpec::Node(node) => {
            let name = node
                .name
                .clone()
                .unwrap_or_else(|| format!("{}#{}", node.kind.label(), index.as_u32()));
            if names.insert(name.clone(), index).is_some() {
                errors.push(ValidationError::DuplicateNode { name: name.clone() });
            }
            let kind = if node.kind == CfKind::Not {
                if node.children.len() != 1 {
                    errors.push(ValidationError::MalformedNode {
                        name: name.clone(),
                        reason: format!("'not' takes exactly one child, got {}", node.children.len()),
                    });
                }
                CfNodeKind::Not
            } else {
                let (mode_or, short_circuit, ordered) = node.kind.default_flags();
                CfNodeKind::Decision(NodeFlags {
                    mode_or: node.mode_or.unwrap_or(mode_or),
                    short_circuit: node.short_circuit.unwrap_or(short_circuit),
                    ordered: node.ordered.unwrap_or(ordered),
                    all_pass: node.all_pass,
                })
            };
            nodes.push(CfNode {
                index,
                name,
                kind,
                parent,
                children: Vec::new(),
                depth,
                leafless: false,
            });
            let mut children = Vec::with_capacity(node.children.len());
            for child in &node.children {
                if let Some(c) =
                    flatten_into(child, Some(index), depth + 1, resolve, nodes, names, errors)
                {
                    children.push(c);
                }
            }
            nodes[index.as_usize()].children = children;
        }
    }
    Some(index)
}

fn mark_leafless(nodes: &mut [CfNode]) {
    // Children always follow their parent in the arena
    for i in (0..nodes.len()).rev() {
        let leafless = match nodes[i].kind {
            CfNodeKind::Leaf(_) => false,
            _ => nodes[i].children.iter().all(|c| nodes[c.as_usize()].leafless),
        };
        nodes[i].leafless = leafless;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(known: &'static [&'static str]) -> impl Fn(&str) -> Option<AlgIndex> {
        move |name| known.iter().position(|k| *k == name).map(AlgIndex::from_usize)
    }

    #[test]
    fn test_deserialize_nested() {
        let spec: CfSpec = serde_json::from_str(
            r#"{"kind": "seq", "name": "top", "children": ["A", {"kind": "or", "children": ["B", "C"]}]}"#,
        )
        .unwrap();
        assert_eq!(spec.algorithms(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_flatten_flags_and_depth() {
        let spec = CfSpec::seq(vec![
            CfSpec::alg("A"),
            CfSpec::or(vec![CfSpec::alg("B"), CfSpec::alg("C")]).named("choice"),
        ])
        .named("top")
        .short_circuit(false);
        let mut errors = Vec::new();
        let nodes = flatten(&spec, &resolver(&["A", "B", "C"]), &mut errors);
        assert!(errors.is_empty());
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[0].name, "top");
        let top = nodes[0].flags().unwrap();
        assert!(top.ordered);
        assert!(!top.short_circuit);
        assert!(!top.mode_or);
        let choice = nodes[2].flags().unwrap();
        assert!(choice.mode_or);
        assert!(choice.short_circuit);
        assert_eq!(nodes[3].depth, 2);
        assert_eq!(nodes[3].parent, Some(NodeIndex::new(2)));
    }

    #[test]
    fn test_flatten_reports_unknown_and_duplicates() {
        let spec = CfSpec::and(vec![CfSpec::alg("A"), CfSpec::alg("Z"), CfSpec::alg("A")]);
        let mut errors = Vec::new();
        let nodes = flatten(&spec, &resolver(&["A"]), &mut errors);
        assert_eq!(nodes[0].children.len(), 2);
        assert!(errors.contains(&ValidationError::UnknownAlgorithm { name: "Z".to_string() }));
        assert!(errors.contains(&ValidationError::DuplicateNode { name: "A".to_string() }));
    }

    #[test]
    fn test_leafless_marking() {
        let spec = CfSpec::and(vec![CfSpec::or(vec![]), CfSpec::alg("A"), CfSpec::and(vec![CfSpec::or(vec![])])]);
        let mut errors = Vec::new();
        let nodes = flatten(&spec, &resolver(&["A"]), &mut errors);
        assert!(!nodes[0].leafless);
        assert!(nodes[1].leafless);
        assert!(nodes[1].is_empty_decision());
        assert!(nodes[3].leafless);
        assert!(!nodes[3].is_empty_decision());
    }

    #[test]
    fn test_not_requires_single_child() {
        let spec = CfSpec::Node(NodeSpec {
            kind: CfKind::Not,
            name: Some("inv".to_string()),
            children: vec![CfSpec::alg("A"), CfSpec::alg("B")],
            short_circuit: None,
            mode_or: None,
            ordered: None,
            all_pass: false,
        });
        let mut errors = Vec::new();
        flatten(&spec, &resolver(&["A", "B"]), &mut errors);
        assert!(matches!(errors[0], ValidationError::MalformedNode { .. }));
    }
}

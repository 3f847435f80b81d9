//! Random control-flow trees for property tests.

use avalanche_plan::{CfKind, CfSpec, NodeSpec};
use proptest::prelude::*;

fn decision_kind() -> impl Strategy<Value = CfKind> {
    prop_oneof![
        Just(CfKind::And),
        Just(CfKind::Or),
        Just(CfKind::Seq),
        Just(CfKind::Par),
        Just(CfKind::Custom),
    ]
}

fn node(kind: CfKind, children: Vec<CfSpec>, short_circuit: Option<bool>, mode_or: Option<bool>, all_pass: bool) -> CfSpec {
    CfSpec::Node(NodeSpec {
        kind,
        name: None,
        children,
        short_circuit,
        mode_or,
        ordered: None,
        all_pass,
    })
}

fn name_leaves(spec: &mut CfSpec, next: &mut usize) {
    match spec {
        CfSpec::Alg(name) => {
            *name = format!("L{}", next);
            *next += 1;
        }
        CfSpec::Node(node) => node.children.iter_mut().for_each(|c| name_leaves(c, next)),
    }
}

/// Trees mixing and/or/seq/par/custom/not nodes, flag overrides and empty
/// nodes, always rooted at a decision node
///
/// Leaves are named `L0`, `L1`, ... in declaration order.
pub(crate) fn cf_tree() -> impl Strategy<Value = CfSpec> {
    let inner = Just(CfSpec::alg("")).prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            4 => (
                decision_kind(),
                proptest::collection::vec(inner.clone(), 0..4),
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<bool>()),
                proptest::bool::weighted(0.1),
            )
                .prop_map(|(kind, children, short_circuit, mode_or, all_pass)| {
                    node(kind, children, short_circuit, mode_or, all_pass)
                }),
            1 => inner.prop_map(CfSpec::not),
        ]
    });
    (
        decision_kind(),
        proptest::collection::vec(inner, 0..4),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(kind, children, short_circuit)| {
            let mut tree = node(kind, children, short_circuit, None, false);
            name_leaves(&mut tree, &mut 0);
            tree
        })
}
